//! Episodes and the splice operations that edit their interiors in place.
//!
//! An episode is one stay: its admission and discharge links (the anchors)
//! plus the inferred events between them. The *current* interior is spliced
//! into the scope chains; a *proposal* interior is a free-standing list of
//! unlinked links. Committing swaps the two and patches every snapshot the
//! change touches, so nothing outside the stay is recomputed.

use ht_common::{Colonization, Error, PatientId, Result};

use crate::event::Event;
use crate::history::{Chain, HistoryGraph, HistoryLink, LinkId, Scope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EpisodeId(pub(crate) usize);

impl std::fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "episode {}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    pub patient: PatientId,
    pub admission: LinkId,
    pub discharge: LinkId,
    head: Option<LinkId>,
    tail: Option<LinkId>,
    proposal_head: Option<LinkId>,
    proposal_tail: Option<LinkId>,
}

impl Episode {
    pub(crate) fn new(patient: PatientId, admission: LinkId, discharge: LinkId) -> Self {
        Episode {
            patient,
            admission,
            discharge,
            head: None,
            tail: None,
            proposal_head: None,
            proposal_tail: None,
        }
    }

    /// No current inferred events.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn has_proposal(&self) -> bool {
        self.proposal_head.is_some()
    }

    /// Swap current and proposal chains.
    pub fn install_proposal(&mut self) {
        std::mem::swap(&mut self.head, &mut self.proposal_head);
        std::mem::swap(&mut self.tail, &mut self.proposal_tail);
    }

    pub(crate) fn push_current(&mut self, links: &mut [HistoryLink], id: LinkId) {
        append(links, &mut self.head, &mut self.tail, id);
    }
}

fn append(
    links: &mut [HistoryLink],
    head: &mut Option<LinkId>,
    tail: &mut Option<LinkId>,
    id: LinkId,
) {
    let c = Chain::Episode.index();
    links[id.0].chains[c].prev = *tail;
    links[id.0].chains[c].next = None;
    match tail {
        Some(t) => links[t.0].chains[c].next = Some(id),
        None => *head = Some(id),
    }
    *tail = Some(id);
}

impl HistoryGraph {
    /// Current inferred links of an episode, in time order.
    pub fn interior(&self, ep: &Episode) -> Vec<LinkId> {
        self.iter_from(ep.head, Chain::Episode).collect()
    }

    pub fn proposal(&self, ep: &Episode) -> Vec<LinkId> {
        self.iter_from(ep.proposal_head, Chain::Episode).collect()
    }

    /// Drop any pending proposal.
    pub fn clear_proposal(&mut self, id: EpisodeId) {
        let pending = self.proposal(&self.episodes[id.0]);
        for link in pending {
            self.release(link);
        }
        let ep = &mut self.episodes[id.0];
        ep.proposal_head = None;
        ep.proposal_tail = None;
    }

    /// Append an inferred event to the episode's proposal.
    pub fn push_proposal(&mut self, id: EpisodeId, event: Event) -> Result<LinkId> {
        let ep = &self.episodes[id.0];
        if event.patient != Some(ep.patient) {
            return Err(Error::OwnerMismatch {
                expected: format!("patient {}", ep.patient),
                actual: event.to_string(),
            });
        }
        if !event.kind.is_shift() {
            return Err(Error::InvalidEvent(format!(
                "only latent shifts can be proposed, got {}",
                event
            )));
        }
        self.check_inside(ep, &event)?;
        if let Some(last) = ep.proposal_tail {
            if self.event(last).time > event.time {
                return Err(Error::GraphConsistency(format!(
                    "proposal for {} out of time order at {}",
                    id, event
                )));
            }
        }

        let link = self.alloc(event);
        let ep = &mut self.episodes[id.0];
        append(&mut self.links, &mut ep.proposal_head, &mut ep.proposal_tail, link);
        Ok(link)
    }

    fn check_inside(&self, ep: &Episode, event: &Event) -> Result<()> {
        let t0 = self.event(ep.admission).time;
        let t1 = self.event(ep.discharge).time;
        if event.time > t0 && event.time < t1 {
            Ok(())
        } else {
            Err(Error::GraphConsistency(format!(
                "{} is not strictly inside stay ({}, {})",
                event, t0, t1
            )))
        }
    }

    /// Splice `link` into the scope chains, give it snapshots, and push its
    /// effect downstream up to the discharge anchor.
    pub fn apply_and_insert(&mut self, id: EpisodeId, link: LinkId) -> Result<()> {
        let ep = self.episodes[id.0].clone();
        let event = *self.event(link);
        self.check_inside(&ep, &event)?;
        if self.link(link).is_linked() {
            return Err(Error::GraphConsistency(format!("{} is already linked", link)));
        }

        for scope in Scope::ALL {
            let chain = Chain::from(scope);
            let mut after = self.prev(ep.discharge, chain).ok_or_else(|| {
                Error::GraphConsistency(format!("discharge of {} has no predecessor", id))
            })?;
            while self.event(after).time > event.time {
                after = self.prev(after, chain).ok_or_else(|| {
                    Error::GraphConsistency(format!("walked off the {:?} chain", chain))
                })?;
            }
            self.insert_after(after, link, chain);
        }
        self.links[link.0].linked = true;

        let before = self.patient_before(link).cloned();
        for scope in Scope::ALL {
            let snapshot = self.state_before(link, scope).cloned().map(|mut s| {
                s.apply(&event, before.as_ref());
                s
            });
            self.set_state(link, scope, snapshot);
        }

        self.propagate(link, ep.discharge, &event, true);
        Ok(())
    }

    /// Exact inverse of [`HistoryGraph::apply_and_insert`].
    pub fn remove_and_unapply(&mut self, id: EpisodeId, link: LinkId) -> Result<()> {
        let discharge = self.episodes[id.0].discharge;
        if !self.link(link).is_linked() {
            return Err(Error::GraphConsistency(format!("{} is not linked", link)));
        }
        let event = *self.event(link);

        self.propagate(link, discharge, &event, false);

        for scope in Scope::ALL {
            self.unlink(link, Chain::from(scope));
            self.set_state(link, scope, None);
        }
        self.links[link.0].linked = false;
        Ok(())
    }

    /// Apply or undo a shift on every snapshot it affects: location scopes
    /// up to the discharge, the patient through it.
    fn propagate(&mut self, link: LinkId, discharge: LinkId, event: &Event, forward: bool) {
        for scope in Scope::ALL {
            let chain = Chain::from(scope);
            let inclusive = scope == Scope::Patient;
            let mut cursor = self.next(link, chain);
            while let Some(c) = cursor {
                if c == discharge && !inclusive {
                    break;
                }
                if let Some(state) = self.state_mut(c, scope) {
                    if forward {
                        state.apply(event, None);
                    } else {
                        state.unapply(event, None);
                    }
                }
                if c == discharge {
                    break;
                }
                cursor = self.next(c, chain);
            }
        }
    }

    /// Change the status an admission assigns. The interior must be empty.
    pub fn regrade_admission(&mut self, id: EpisodeId, grade: Colonization) -> Result<()> {
        let ep = self.episodes[id.0].clone();
        if !ep.is_empty() {
            return Err(Error::GraphConsistency(format!(
                "cannot regrade {} with a non-empty interior",
                id
            )));
        }
        let kind = self.event(ep.admission).kind;
        let old = kind.admission_grade().ok_or_else(|| {
            Error::GraphConsistency(format!("{} does not start with an admission", id))
        })?;
        if old == grade {
            return Ok(());
        }
        self.event_mut(ep.admission).kind = kind.regraded(grade);

        for scope in Scope::ALL {
            let chain = Chain::from(scope);
            let inclusive = scope == Scope::Patient;
            let mut cursor = Some(ep.admission);
            while let Some(c) = cursor {
                if c == ep.discharge && !inclusive {
                    break;
                }
                if let Some(state) = self.state_mut(c, scope) {
                    state.reclassify(ep.patient, old, grade);
                }
                if c == ep.discharge {
                    break;
                }
                cursor = self.next(c, chain);
            }
        }
        Ok(())
    }

    /// Replace the current interior with the proposal and set the admission
    /// grade: undo current → install → apply new. The old interior's links
    /// go back to the arena.
    pub fn commit_proposal(&mut self, id: EpisodeId, grade: Colonization) -> Result<()> {
        let current = self.interior(&self.episodes[id.0]);
        for link in current.iter().rev() {
            self.remove_and_unapply(id, *link)?;
        }
        self.regrade_admission(id, grade)?;
        self.episodes[id.0].install_proposal();
        for link in self.interior(&self.episodes[id.0]) {
            self.apply_and_insert(id, link)?;
        }
        self.clear_proposal(id);
        Ok(())
    }

    /// Admission grade currently assigned to an episode.
    pub fn admission_grade(&self, id: EpisodeId) -> Colonization {
        self.event(self.episodes[id.0].admission)
            .kind
            .admission_grade()
            .unwrap_or(Colonization::Uncolonized)
    }
}
