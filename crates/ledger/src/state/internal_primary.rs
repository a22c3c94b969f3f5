//! Primary names: a one-to-one mapping from owner address to a registered
//! name, granted by the name's controlling process.
//!
//! `primary_names` (owner -> name) and `primary_name_owners` (name ->
//! owner) are kept in lockstep; every mutation goes through the helpers
//! here so the two maps cannot drift.

use mgn_common::Address;

use crate::error::{bail_conflict, Result};
use crate::pricing::validate_name;

use super::{PrimaryNameRequest, State};

impl State {
    /// File (or replace) the caller's pending request to adopt `name` as
    /// their primary name. Takes effect only once the name's controlling
    /// process approves.
    pub fn request_primary_name(
        &mut self,
        initiator: &Address,
        raw_name: &str,
        now: u64,
    ) -> Result<()> {
        let name = validate_name(raw_name)?;
        if !self.records.contains_key(&name) {
            bail_conflict!("name {name} is not registered");
        }
        if self.primary_names.get(initiator) == Some(&name) {
            bail_conflict!("{name} is already the primary name of {initiator}");
        }
        self.primary_name_requests.insert(
            initiator.clone(),
            PrimaryNameRequest {
                name,
                start_timestamp: now,
            },
        );
        Ok(())
    }

    /// Approve `recipient`'s pending request. The approver must be the
    /// controlling process of the requested name. Replaces any prior
    /// mapping held by the recipient, and evicts any prior owner of the
    /// name. Returns the approved name.
    pub fn approve_primary_name_request(
        &mut self,
        approver: &Address,
        recipient: &Address,
    ) -> Result<String> {
        let request = match self.primary_name_requests.get(recipient) {
            Some(r) => r,
            None => bail_conflict!("{recipient} has no pending primary name request"),
        };
        let name = request.name.clone();
        match self.records.get(&name) {
            Some(record) if record.process_id == *approver => {}
            Some(_) => bail_conflict!("only the controlling process may approve {name}"),
            None => {
                // The record expired while the request was pending.
                self.primary_name_requests.remove(recipient);
                bail_conflict!("name {name} is no longer registered");
            }
        }
        self.primary_name_requests.remove(recipient);
        self.unlink_primary_owner(recipient);
        if let Some(previous_owner) = self.primary_name_owners.remove(&name) {
            self.primary_names.remove(&previous_owner);
        }
        self.primary_names.insert(recipient.clone(), name.clone());
        self.primary_name_owners.insert(name.clone(), recipient.clone());
        Ok(name)
    }

    /// Drop an owner's primary name. Allowed for the owner themselves or
    /// for the controlling process of the mapped name.
    pub fn remove_primary_name(&mut self, caller: &Address, owner: &Address) -> Result<String> {
        let name = match self.primary_names.get(owner) {
            Some(n) => n.clone(),
            None => bail_conflict!("{owner} has no primary name"),
        };
        let is_controlling_process = self
            .records
            .get(&name)
            .is_some_and(|r| r.process_id == *caller);
        if caller != owner && !is_controlling_process {
            bail_conflict!("only the owner or the controlling process may remove a primary name");
        }
        self.unlink_primary_owner(owner);
        Ok(name)
    }

    /// Remove the owner's mapping from both directions, if present.
    fn unlink_primary_owner(&mut self, owner: &Address) {
        if let Some(name) = self.primary_names.remove(owner) {
            self.primary_name_owners.remove(&name);
        }
    }

    /// Called when `name` leaves the registry: its primary mapping and any
    /// pending requests for it go with it.
    pub(crate) fn remove_primary_names_for(&mut self, name: &str) {
        if let Some(owner) = self.primary_name_owners.remove(name) {
            self.primary_names.remove(&owner);
        }
        self.primary_name_requests
            .retain(|_, request| request.name != name);
    }
}
