#![allow(dead_code)]

use haul_sync::domain::assignment::{AssignmentModel, AssignmentUnit, OwnerUnit};
use haul_sync::domain::value_objects::{OwnerId, RecordId, UnitId};
use haul_sync::infrastructure::notify::BroadcastNotifier;
use haul_sync::infrastructure::remote::InMemoryRecordStore;
use haul_sync::{AppConfig, SyncContext};
use std::path::Path;
use std::sync::Arc;

pub fn unit_id(raw: &str) -> UnitId {
    UnitId::new(raw.to_string()).expect("unit id")
}

pub fn owner_id(raw: &str) -> OwnerId {
    OwnerId::new(raw.to_string()).expect("owner id")
}

pub fn record_id(raw: &str) -> RecordId {
    RecordId::new(raw.to_string()).expect("record id")
}

/// Two excavators and two trucks, as the editor would seed them.
pub fn pit_model() -> AssignmentModel {
    let mut model = AssignmentModel::new();
    model.register_owner(OwnerUnit::new(owner_id("EX01")).with_work_area("North Pit"));
    model.register_owner(OwnerUnit::new(owner_id("EX02")).with_work_area("South Pit"));
    model
        .insert_unit(
            AssignmentUnit::new(unit_id("T1"))
                .with_attribute("material", "Coal")
                .with_attribute("geo_layer", "Seam B"),
        )
        .expect("insert T1");
    model
        .insert_unit(AssignmentUnit::new(unit_id("R1")).with_attribute("material", "Waste"))
        .expect("insert R1");
    model
}

pub async fn start_context(
    data_dir: &Path,
    remote: Arc<InMemoryRecordStore>,
    notifier: Arc<BroadcastNotifier>,
) -> SyncContext {
    let mut config = AppConfig::with_data_dir(data_dir);
    config.remote.write_timeout_ms = 2_000;
    SyncContext::initialize(config, pit_model(), remote, notifier)
        .await
        .expect("sync context")
}
