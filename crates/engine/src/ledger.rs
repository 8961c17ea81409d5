//! Transaction ledger fed by widget purchase events

use std::collections::HashMap;

use tracing::{debug, info, warn};

use onramp_types::{NewPurchase, OrderingWarning, TransactionRecord, TransactionStatus};

use crate::session::WidgetEvent;

/// Purchase attempts of this session, keyed by widget-assigned id
#[derive(Debug, Clone, Default)]
pub struct TransactionLedger {
    records: Vec<TransactionRecord>,
    index: HashMap<String, usize>,
}

impl TransactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pending record. A repeated id is ignored.
    pub fn on_purchase_created(&mut self, id: &str, purchase: NewPurchase) -> bool {
        if self.index.contains_key(id) {
            debug!("Purchase {} already recorded, ignoring duplicate creation", id);
            return false;
        }

        info!(
            "Purchase created: {} ({} {} for {} {})",
            id, purchase.asset_amount, purchase.asset, purchase.fiat_amount, purchase.fiat_currency
        );
        self.index.insert(id.to_string(), self.records.len());
        self.records.push(TransactionRecord::pending(id, purchase));
        true
    }

    /// Set the status of a known record. Returns whether it changed;
    /// an unknown id is reported and dropped.
    pub fn on_status_change(&mut self, id: &str, status: TransactionStatus) -> Result<bool, OrderingWarning> {
        let Some(&position) = self.index.get(id) else {
            return Err(OrderingWarning { id: id.to_string() });
        };

        let record = &mut self.records[position];
        if record.status == status {
            return Ok(false);
        }

        info!("Purchase {}: {} -> {}", id, record.status, status);
        record.status = status;
        Ok(true)
    }

    /// Route a normalized widget event. Returns whether the ledger changed.
    pub fn apply_event(&mut self, event: &WidgetEvent) -> bool {
        if let WidgetEvent::PurchaseCreated { id, purchase } = event {
            return self.on_purchase_created(id, purchase.clone());
        }

        let Some((id, status)) = event.status() else {
            return false;
        };
        match self.on_status_change(id, status) {
            Ok(changed) => changed,
            Err(warning) => {
                warn!("{}, dropping {} update", warning, status);
                false
            }
        }
    }

    /// Records, most recent first
    pub fn list(&self) -> impl Iterator<Item = &TransactionRecord> + Clone + '_ {
        self.records.iter().rev()
    }

    pub fn get(&self, id: &str) -> Option<&TransactionRecord> {
        self.index.get(id).map(|&position| &self.records[position])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
