mod batch;
mod change;
pub mod community;

pub use batch::group_changes;
pub use change::{Change, ChangeOp, PathIdAllocator, RouteAttributes};
pub use community::{Community, CommunityList};

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;

use crate::wire::attributes::PathAttribute;
use crate::wire::nlri::RouteKey;
use crate::wire::{Family, Nlri, Update};

/// The outgoing Adj-RIB for one peer: desired state keyed by route
/// identity, plus the ordered queue of not-yet-sent changes.
///
/// The pending queue is keyed, so resubmitting a route collapses onto the
/// earlier queue position; the queue can never outgrow the table.
#[derive(Debug, Default)]
pub struct AdjRibOut {
    entries: BTreeMap<RouteKey, Arc<RouteAttributes>>,
    pending: VecDeque<RouteKey>,
    pending_changes: HashMap<RouteKey, Change>,
    advertised: HashSet<RouteKey>,
    path_ids: PathIdAllocator,
    eor_queue: Vec<Family>,
}

impl AdjRibOut {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the path-id allocator out, for handing to a re-created peer
    pub fn take_path_ids(&mut self) -> PathIdAllocator {
        std::mem::take(&mut self.path_ids)
    }

    pub fn with_path_ids(path_ids: PathIdAllocator) -> Self {
        Self {
            path_ids,
            ..Default::default()
        }
    }

    /// Entries currently announced (or queued to be)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn routes(&self) -> impl Iterator<Item = (&RouteKey, &Arc<RouteAttributes>)> {
        self.entries.iter()
    }

    /// Current entries with their keys decoded back to NLRI form
    pub fn entries(&self) -> Vec<(Nlri, Arc<RouteAttributes>)> {
        self.entries
            .iter()
            .filter_map(|(key, attributes)| {
                decode_key_nlri(key).map(|nlri| (nlri, attributes.clone()))
            })
            .collect()
    }

    /// Resolve the ADD-PATH identifier for an announce: an explicit
    /// path-id is reserved for reuse, otherwise the allocator hands out
    /// the identifier assigned to this prefix before any reload
    fn resolve_path_id(&mut self, nlri: Nlri, addpath: bool) -> Nlri {
        if !addpath {
            return nlri;
        }
        let bare = nlri.index_without_path_id();
        match nlri.path_id() {
            Some(path_id) => {
                self.path_ids.reserve(&bare, path_id);
                nlri
            }
            None => {
                let path_id = self.path_ids.path_id_for(&bare);
                nlri.with_path_id(Some(path_id))
            }
        }
    }

    /// Submit an announce; returns the queued Change, or None when it
    /// deduplicated against the current state
    pub fn announce(
        &mut self,
        nlri: Nlri,
        attributes: Arc<RouteAttributes>,
        addpath: bool,
    ) -> Option<Change> {
        let nlri = self.resolve_path_id(nlri, addpath);
        let key = nlri.index();
        if let Some(existing) = self.entries.get(&key) {
            let effective = match self.pending_changes.get(&key) {
                Some(change) => change.op == ChangeOp::Announce,
                None => self.advertised.contains(&key),
            };
            if **existing == *attributes && effective {
                debug!("Dropping no-op announce for {}", nlri);
                return None;
            }
        }
        self.entries.insert(key.clone(), attributes.clone());
        let change = Change::announce(nlri, attributes);
        self.queue(key, change.clone());
        Some(change)
    }

    /// Submit a withdraw; unknown keys are a no-op
    pub fn withdraw(&mut self, nlri: Nlri, addpath: bool) -> Option<Change> {
        let nlri = if addpath && nlri.path_id().is_none() {
            match self.path_ids.lookup(&nlri.index_without_path_id()) {
                Some(path_id) => nlri.with_path_id(Some(path_id)),
                None => return None,
            }
        } else {
            nlri
        };
        let key = nlri.index();
        if self.entries.remove(&key).is_none() {
            debug!("Dropping withdraw for unknown route {}", nlri);
            return None;
        }
        if self.advertised.contains(&key) {
            let change = Change::withdraw(nlri);
            self.queue(key, change.clone());
            Some(change)
        } else {
            // Never made it to the wire; cancel the queued announce
            self.pending_changes.remove(&key);
            None
        }
    }

    fn queue(&mut self, key: RouteKey, change: Change) {
        if self.pending_changes.insert(key.clone(), change).is_none() {
            self.pending.push_back(key);
        }
    }

    /// Drain queued changes in submission order, updating advertisement
    /// bookkeeping as if they were sent
    pub fn take_pending(&mut self) -> Vec<Change> {
        let mut changes = Vec::with_capacity(self.pending.len());
        while let Some(key) = self.pending.pop_front() {
            if let Some(change) = self.pending_changes.remove(&key) {
                match change.op {
                    ChangeOp::Announce => {
                        self.advertised.insert(key);
                    }
                    ChangeOp::Withdraw => {
                        self.advertised.remove(&key);
                    }
                }
                changes.push(change);
            }
        }
        changes
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_changes.is_empty() || !self.eor_queue.is_empty()
    }

    /// Queue an End-of-RIB for `family`, emitted after the changes
    /// already submitted for it
    pub fn schedule_eor(&mut self, family: Family) {
        if !self.eor_queue.contains(&family) {
            self.eor_queue.push(family);
        }
    }

    pub fn take_eors(&mut self) -> Vec<Family> {
        std::mem::take(&mut self.eor_queue)
    }

    /// Queue every current entry again (route-refresh handling)
    pub fn mark_all_pending(&mut self) {
        let requeue: Vec<(RouteKey, Change)> = self
            .entries
            .iter()
            .filter(|(key, _)| !self.pending_changes.contains_key(*key))
            .filter_map(|(key, attrs)| {
                decode_key_nlri(key)
                    .map(|nlri| (key.clone(), Change::announce(nlri, attrs.clone())))
            })
            .collect();
        for (key, change) in requeue {
            self.queue(key, change);
        }
    }

    /// Forget everything, including queued work
    pub fn clear(&mut self) {
        self.entries.clear();
        self.pending.clear();
        self.pending_changes.clear();
        self.advertised.clear();
        self.eor_queue.clear();
    }
}

/// Recover the NLRI from a route key (family codepoints + encoded NLRI)
fn decode_key_nlri(key: &RouteKey) -> Option<Nlri> {
    use std::convert::TryFrom;
    let afi = u16::from_be_bytes([*key.0.get(0)?, *key.0.get(1)?]);
    let safi = *key.0.get(2)?;
    let family = Family::try_from((afi, safi)).ok()?;
    // Identity bytes embed the path id exactly when one was assigned;
    // try the ADD-PATH form first and fall back to the plain one
    for addpath in [true, false] {
        let mut cursor = std::io::Cursor::new(&key.0[3..]);
        if let Ok(nlri) = Nlri::unpack_nlri(family, &mut cursor, addpath) {
            if cursor.position() as usize == key.0.len() - 3 {
                return Some(nlri);
            }
        }
    }
    None
}

/// One received route held in a peer's Adj-RIB-In
#[derive(Debug, Clone)]
pub struct RibInEntry {
    pub nlri: Nlri,
    pub attributes: Vec<PathAttribute>,
    pub next_hop: Option<IpAddr>,
    pub timestamp: DateTime<Utc>,
    pub stale: bool,
}

/// Routes learned from one peer, keyed by route identity. Cleared on
/// session end unless graceful restart holds them stale.
#[derive(Debug, Default)]
pub struct AdjRibIn {
    routes: BTreeMap<RouteKey, RibInEntry>,
}

impl AdjRibIn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn routes(&self) -> impl Iterator<Item = &RibInEntry> {
        self.routes.values()
    }

    /// Fold a received UPDATE in; returns (announced, withdrawn) for
    /// event reporting
    pub fn apply_update(&mut self, update: &Update) -> (Vec<RibInEntry>, Vec<Nlri>) {
        let mut withdrawn: Vec<Nlri> = vec![];
        for nlri in &update.withdrawn {
            self.routes.remove(&nlri.index());
            withdrawn.push(nlri.clone());
        }

        // Attributes shared by every announced route; the MP containers
        // are transport, not part of the stored set
        let shared: Vec<PathAttribute> = update
            .attributes
            .iter()
            .filter(|a| !matches!(a, PathAttribute::MpReach(_) | PathAttribute::MpUnreach(_)))
            .cloned()
            .collect();
        let direct_next_hop = update.attributes.iter().find_map(|a| match a {
            PathAttribute::NextHop(addr) => Some(*addr),
            _ => None,
        });

        let mut announced: Vec<RibInEntry> = vec![];
        for nlri in &update.announced {
            announced.push(self.insert(nlri.clone(), shared.clone(), direct_next_hop));
        }
        for attribute in &update.attributes {
            match attribute {
                PathAttribute::MpReach(mp) => {
                    for nlri in &mp.nlris {
                        announced.push(self.insert(
                            nlri.clone(),
                            shared.clone(),
                            mp.next_hop.addr(),
                        ));
                    }
                }
                PathAttribute::MpUnreach(mp) => {
                    for nlri in &mp.nlris {
                        self.routes.remove(&nlri.index());
                        withdrawn.push(nlri.clone());
                    }
                }
                _ => (),
            }
        }
        (announced, withdrawn)
    }

    fn insert(
        &mut self,
        nlri: Nlri,
        attributes: Vec<PathAttribute>,
        next_hop: Option<IpAddr>,
    ) -> RibInEntry {
        let entry = RibInEntry {
            nlri: nlri.clone(),
            attributes,
            next_hop,
            timestamp: Utc::now(),
            stale: false,
        };
        self.routes.insert(nlri.index(), entry.clone());
        entry
    }

    /// Graceful restart: keep routes but flag them until the peer's
    /// post-restart End-of-RIB
    pub fn mark_stale(&mut self) {
        for entry in self.routes.values_mut() {
            entry.stale = true;
        }
    }

    /// Drop routes still flagged stale (post-EOR, or stale timer lapse)
    pub fn sweep_stale(&mut self) -> usize {
        let before = self.routes.len();
        self.routes.retain(|_, entry| !entry.stale);
        before - self.routes.len()
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }
}
