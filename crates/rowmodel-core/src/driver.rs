//! Storage driver contract.
//!
//! The instance controller never builds SQL or speaks a wire protocol. It
//! hands field payloads and identity conditions to a [`Driver`], which owns
//! that translation. All operations integrate with asupersync's structured
//! concurrency via the `Cx` context, the same way `Connection` does for
//! query execution.
//!
//! The trait is object-safe so that every model, and every association
//! cascade running on behalf of a model, can share one `Arc<dyn Driver>`.

use crate::error::Error;
use crate::property::Property;
use crate::value::{Record, Value};
use asupersync::{Cx, Outcome};
use futures::future::BoxFuture;

/// A storage backend capable of persisting instance rows.
pub trait Driver: Send + Sync {
    /// Insert one row into `table`.
    ///
    /// `id_fields` names the identity columns. The returned record carries
    /// the identity values the store assigned; identity fields it does not
    /// mention keep the submitted value.
    fn insert<'a>(
        &'a self,
        cx: &'a Cx,
        table: &'a str,
        data: &'a Record,
        id_fields: &'a [String],
    ) -> BoxFuture<'a, Outcome<Record, Error>>;

    /// Update the rows of `table` matching every `conditions` entry with
    /// the values in `changes`.
    fn update<'a>(
        &'a self,
        cx: &'a Cx,
        table: &'a str,
        changes: &'a Record,
        conditions: &'a Record,
    ) -> BoxFuture<'a, Outcome<(), Error>>;

    /// Remove the rows of `table` matching every `conditions` entry.
    fn remove<'a>(
        &'a self,
        cx: &'a Cx,
        table: &'a str,
        conditions: &'a Record,
    ) -> BoxFuture<'a, Outcome<(), Error>>;

    /// Convert an instance value into its stored representation.
    ///
    /// Applied to every outgoing payload value that has a property
    /// definition. The default leaves the value untouched.
    fn property_to_value(&self, value: Value, property: &Property) -> Value {
        let _ = property;
        value
    }

    /// Convert a stored (or user supplied) value into its instance
    /// representation.
    ///
    /// Applied on every field write and when slots are filled at
    /// construction. The default leaves the value untouched.
    fn value_to_property(&self, value: Value, property: &Property) -> Value {
        let _ = property;
        value
    }
}

/// Normalize `value` against `property` and run it through the driver's
/// outgoing coercion.
pub fn outgoing_value(driver: &dyn Driver, value: Value, property: &Property) -> Value {
    driver.property_to_value(property.normalize(value), property)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    struct UpperDriver;

    impl Driver for UpperDriver {
        fn insert<'a>(
            &'a self,
            _cx: &'a Cx,
            _table: &'a str,
            _data: &'a Record,
            _id_fields: &'a [String],
        ) -> BoxFuture<'a, Outcome<Record, Error>> {
            async { Outcome::Ok(Record::new()) }.boxed()
        }

        fn update<'a>(
            &'a self,
            _cx: &'a Cx,
            _table: &'a str,
            _changes: &'a Record,
            _conditions: &'a Record,
        ) -> BoxFuture<'a, Outcome<(), Error>> {
            async { Outcome::Ok(()) }.boxed()
        }

        fn remove<'a>(
            &'a self,
            _cx: &'a Cx,
            _table: &'a str,
            _conditions: &'a Record,
        ) -> BoxFuture<'a, Outcome<(), Error>> {
            async { Outcome::Ok(()) }.boxed()
        }

        fn property_to_value(&self, value: Value, _property: &Property) -> Value {
            match value {
                Value::Text(s) => Value::Text(s.to_uppercase()),
                other => other,
            }
        }
    }

    #[test]
    fn test_outgoing_value_normalizes_then_converts() {
        let driver = UpperDriver;
        let prop = Property::text("code");
        assert_eq!(
            outgoing_value(&driver, Value::BigInt(7), &prop),
            Value::from("7")
        );
        assert_eq!(
            outgoing_value(&driver, Value::from("ab"), &prop),
            Value::from("AB")
        );
    }

    #[test]
    fn test_default_value_to_property_is_identity() {
        let driver = UpperDriver;
        let prop = Property::text("code");
        assert_eq!(
            driver.value_to_property(Value::from("ab"), &prop),
            Value::from("ab")
        );
    }
}
