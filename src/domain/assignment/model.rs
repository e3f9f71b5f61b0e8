use super::unit::{
    parse_loads, parse_optional_text, parse_owner, AssignmentUnit, OwnerUnit,
    UnitState, LOADS_FIELD, OWNER_FIELD, WORK_AREA_FIELD,
};
use crate::domain::value_objects::{FieldMap, FieldValue, OwnerId, UnitId};
use crate::shared::error::AppError;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

pub type SharedAssignmentModel = Arc<RwLock<AssignmentModel>>;

/// In-memory many-to-one relation between units and owners.
///
/// Every operation is synchronous and either fully applies or leaves the
/// model untouched.
#[derive(Debug, Default, Clone)]
pub struct AssignmentModel {
    owners: BTreeMap<OwnerId, OwnerUnit>,
    units: BTreeMap<UnitId, AssignmentUnit>,
    members: BTreeMap<OwnerId, BTreeSet<UnitId>>,
    unassigned: BTreeSet<UnitId>,
}

/// Validated form of a field change set, computed before anything is touched.
struct ChangePlan {
    owner: Option<Option<OwnerId>>,
    work_area: Option<Option<String>>,
    loads: Option<u32>,
    attributes: FieldMap,
}

impl AssignmentModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedAssignmentModel {
        Arc::new(RwLock::new(self))
    }

    /// Adds an owner or updates its default working area.
    pub fn register_owner(&mut self, owner: OwnerUnit) {
        self.members.entry(owner.id.clone()).or_default();
        self.owners.insert(owner.id.clone(), owner);
    }

    /// Removes an owner that no unit points to.
    pub fn remove_owner(&mut self, owner_id: &OwnerId) -> Result<OwnerUnit, AppError> {
        let assigned = self.members.get(owner_id).map_or(0, BTreeSet::len);
        if assigned > 0 {
            return Err(AppError::ValidationError(format!(
                "Owner {owner_id} still has {assigned} assigned units"
            )));
        }
        self.members.remove(owner_id);
        self.owners
            .remove(owner_id)
            .ok_or_else(|| AppError::OwnerNotFound(owner_id.to_string()))
    }

    pub fn insert_unit(&mut self, unit: AssignmentUnit) -> Result<(), AppError> {
        if self.units.contains_key(&unit.id) {
            return Err(AppError::ValidationError(format!(
                "Unit {} already exists",
                unit.id
            )));
        }
        self.replace_unit(unit).map(|_| ())
    }

    /// Stores `unit` as-is (inserting or overwriting), re-homing its membership.
    pub fn replace_unit(&mut self, unit: AssignmentUnit) -> Result<AssignmentUnit, AppError> {
        if let Some(owner_id) = &unit.owner_id {
            self.ensure_owner(owner_id)?;
        }
        let previous_owner = self
            .units
            .get(&unit.id)
            .and_then(|existing| existing.owner_id.clone());
        self.rehome(&unit.id, previous_owner.as_ref(), unit.owner_id.as_ref());
        self.units.insert(unit.id.clone(), unit.clone());
        Ok(unit)
    }

    pub fn assign(
        &mut self,
        unit_id: &UnitId,
        owner_id: &OwnerId,
    ) -> Result<AssignmentUnit, AppError> {
        let mut changes = FieldMap::new();
        changes.insert(
            OWNER_FIELD.to_string(),
            FieldValue::Text(owner_id.to_string()),
        );
        self.apply_changes(unit_id, &changes)
    }

    pub fn unassign(&mut self, unit_id: &UnitId) -> Result<AssignmentUnit, AppError> {
        let mut changes = FieldMap::new();
        changes.insert(OWNER_FIELD.to_string(), FieldValue::Null);
        self.apply_changes(unit_id, &changes)
    }

    /// Applies a field change set to one unit.
    ///
    /// An owner change runs first (assign or unassign, resetting owner-scoped
    /// fields); explicit `work_area`, `loads` and attribute values are applied
    /// on top. Assigning a unit to the owner it already has is not a
    /// transition and keeps its loads.
    pub fn apply_changes(
        &mut self,
        unit_id: &UnitId,
        changes: &FieldMap,
    ) -> Result<AssignmentUnit, AppError> {
        let current = self
            .units
            .get(unit_id)
            .ok_or_else(|| AppError::UnitNotFound(unit_id.to_string()))?;
        let plan = self.plan(changes)?;

        let mut next = current.clone();
        let previous_owner = current.owner_id.clone();

        // 所有者の変更を先に適用する
        if let Some(target) = &plan.owner {
            // 同じ所有者への割り当ては遷移ではない
            if *target != previous_owner {
                match target {
                    Some(owner_id) => {
                        let owner = self.ensure_owner(owner_id)?;
                        next.link_owner(owner);
                    }
                    None => next.clear_owner(),
                }
            }
        }
        if let Some(work_area) = plan.work_area {
            next.work_area = work_area;
        }
        if let Some(loads) = plan.loads {
            next.loads = loads;
        }
        // 明示された値は遷移の後に上書きする
        for (name, value) in plan.attributes {
            next.attributes.insert(name, value);
        }

        self.rehome(unit_id, previous_owner.as_ref(), next.owner_id.as_ref());
        self.units.insert(unit_id.clone(), next.clone());
        Ok(next)
    }

    pub fn unit(&self, unit_id: &UnitId) -> Option<&AssignmentUnit> {
        self.units.get(unit_id)
    }

    pub fn owner(&self, owner_id: &OwnerId) -> Option<&OwnerUnit> {
        self.owners.get(owner_id)
    }

    pub fn owners(&self) -> impl Iterator<Item = &OwnerUnit> {
        self.owners.values()
    }

    pub fn state(&self, unit_id: &UnitId) -> Option<UnitState> {
        self.units.get(unit_id).map(AssignmentUnit::state)
    }

    pub fn units_of(&self, owner_id: &OwnerId) -> Vec<&AssignmentUnit> {
        self.members
            .get(owner_id)
            .map(|ids| ids.iter().filter_map(|id| self.units.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn unassigned_units(&self) -> Vec<&AssignmentUnit> {
        self.unassigned
            .iter()
            .filter_map(|id| self.units.get(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Verifies that every unit sits in exactly one bucket matching its owner.
    pub fn check_invariants(&self) -> Result<(), AppError> {
        let mut seen: BTreeSet<&UnitId> = BTreeSet::new();

        for (owner_id, ids) in &self.members {
            if !self.owners.contains_key(owner_id) {
                return Err(AppError::Internal(format!(
                    "membership list for missing owner {owner_id}"
                )));
            }
            for id in ids {
                if !seen.insert(id) {
                    return Err(AppError::Internal(format!(
                        "unit {id} is listed under more than one owner"
                    )));
                }
                let unit = self.units.get(id).ok_or_else(|| {
                    AppError::Internal(format!("owner {owner_id} lists unknown unit {id}"))
                })?;
                if unit.owner_id.as_ref() != Some(owner_id) {
                    return Err(AppError::Internal(format!(
                        "unit {id} listed under {owner_id} but points elsewhere"
                    )));
                }
            }
        }

        for id in &self.unassigned {
            if !seen.insert(id) {
                return Err(AppError::Internal(format!(
                    "unit {id} is both assigned and in the unassigned pool"
                )));
            }
            let unit = self
                .units
                .get(id)
                .ok_or_else(|| AppError::Internal(format!("pool lists unknown unit {id}")))?;
            if unit.owner_id.is_some() {
                return Err(AppError::Internal(format!(
                    "unit {id} is pooled but has an owner"
                )));
            }
        }

        if seen.len() != self.units.len() {
            return Err(AppError::Internal(format!(
                "{} units tracked but {} placed",
                self.units.len(),
                seen.len()
            )));
        }
        Ok(())
    }

    fn plan(&self, changes: &FieldMap) -> Result<ChangePlan, AppError> {
        let mut plan = ChangePlan {
            owner: None,
            work_area: None,
            loads: None,
            attributes: FieldMap::new(),
        };

        // 何も変更する前に全項目を検証する
        for (name, value) in changes {
            match name.as_str() {
                OWNER_FIELD => {
                    let owner = parse_owner(value)?;
                    if let Some(owner_id) = &owner {
                        self.ensure_owner(owner_id)?;
                    }
                    plan.owner = Some(owner);
                }
                WORK_AREA_FIELD => plan.work_area = Some(parse_optional_text(name, value)?),
                LOADS_FIELD => plan.loads = Some(parse_loads(value)?),
                _ => {
                    plan.attributes.insert(name.clone(), value.clone());
                }
            }
        }
        Ok(plan)
    }

    fn ensure_owner(&self, owner_id: &OwnerId) -> Result<&OwnerUnit, AppError> {
        self.owners
            .get(owner_id)
            .ok_or_else(|| AppError::OwnerNotFound(owner_id.to_string()))
    }

    fn rehome(&mut self, unit_id: &UnitId, from: Option<&OwnerId>, to: Option<&OwnerId>) {
        match from {
            Some(owner_id) => {
                if let Some(ids) = self.members.get_mut(owner_id) {
                    ids.remove(unit_id);
                }
            }
            None => {
                self.unassigned.remove(unit_id);
            }
        }
        match to {
            Some(owner_id) => {
                self.members
                    .entry(owner_id.clone())
                    .or_default()
                    .insert(unit_id.clone());
            }
            None => {
                self.unassigned.insert(unit_id.clone());
            }
        }
    }
}
