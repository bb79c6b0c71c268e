//! Link-table attributes ("extra" fields) of instances reached through a
//! many-to-many association.

use rowmodel_core::{
    Cx, Error, Outcome, Record, UsageError, UsageErrorKind, Value, outgoing_value,
};

use crate::instance::Instance;

/// Where an instance's extra attributes live.
///
/// `id` holds the identity values of the instance on the other side of the
/// link, stored in the `id_prop` columns; `assoc_prop` columns reference
/// this instance's identity fields, paired in key order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtraInfo {
    pub table: String,
    pub id: Vec<Value>,
    pub id_prop: Vec<String>,
    pub assoc_prop: Vec<String>,
}

impl ExtraInfo {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id: Vec::new(),
            id_prop: Vec::new(),
            assoc_prop: Vec::new(),
        }
    }

    /// Add one key pair: the other side's `value` stored in `id_prop`, and
    /// the column `assoc_prop` referencing this instance.
    #[must_use]
    pub fn key(
        mut self,
        id_prop: impl Into<String>,
        value: impl Into<Value>,
        assoc_prop: impl Into<String>,
    ) -> Self {
        self.id_prop.push(id_prop.into());
        self.id.push(value.into());
        self.assoc_prop.push(assoc_prop.into());
        self
    }
}

impl Instance {
    /// Persist dirty extra attributes to the link table.
    ///
    /// Completes immediately when nothing is dirty. The dirty set is cleared
    /// once the driver confirms the update.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(table = %self.model().table()))]
    pub(crate) async fn save_extra(&self, cx: &Cx) -> Outcome<(), Error> {
        let (pending, data) = self.extra_snapshot();
        if pending.is_empty() {
            return Outcome::Ok(());
        }
        let Some(info) = self.extra_info() else {
            return Outcome::Err(
                UsageError::new(
                    UsageErrorKind::MissingExtraInfo,
                    self.model().table(),
                    "extra attributes changed but the instance has no link-table information",
                )
                .into(),
            );
        };

        let model = self.model();
        let driver = model.driver();
        let mut payload = Record::new();
        for field in &pending {
            let Some(value) = data.get(field) else {
                continue;
            };
            let value = match self.extra_property(field) {
                Some(property) => outgoing_value(driver.as_ref(), value.clone(), &property),
                None => value.clone(),
            };
            payload.insert(field.clone(), value);
        }

        let mut conditions = Record::new();
        for ((id_value, id_prop), (assoc_prop, own_id)) in info
            .id
            .iter()
            .zip(&info.id_prop)
            .zip(info.assoc_prop.iter().zip(model.id()))
        {
            conditions.insert(id_prop.clone(), id_value.clone());
            conditions.insert(
                assoc_prop.clone(),
                data.get(own_id).cloned().unwrap_or_default(),
            );
        }

        tracing::debug!(
            link_table = %info.table,
            fields = payload.len(),
            "Updating extra attributes"
        );
        match driver.update(cx, &info.table, &payload, &conditions).await {
            Outcome::Ok(()) => {
                self.clear_extra_changes(&pending);
                Outcome::Ok(())
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}
