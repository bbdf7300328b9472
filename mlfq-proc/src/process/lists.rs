//! State membership lists
//!
//! Every table slot sits in exactly one list at a time: one list per
//! non-ready state and one per ready priority level. Lists are singly linked
//! through a shared arena of forward links indexed by slot, so a slot can
//! never be linked twice and a recycled slot never leaves a dangling link.
//!
//! Nothing here locks; callers hold the process table lock.

use core::fmt;

use mlfq_api::config::{NPROC, PRIORITY_LEVELS};
use mlfq_api::{Priority, ProcState};
use static_assertions::const_assert;

// One bit of the ready mask per priority level
const_assert!(PRIORITY_LEVELS <= u64::BITS as usize);

/// Index of a process slot in the table
pub type SlotId = usize;

/// Names one membership list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListId {
    Unused,
    Embryo,
    Sleeping,
    Running,
    Zombie,
    Ready(Priority),
}

impl ListId {
    /// The list a process in `state` at `priority` must be on
    pub const fn for_state(state: ProcState, priority: Priority) -> Self {
        match state {
            ProcState::Unused => ListId::Unused,
            ProcState::Embryo => ListId::Embryo,
            ProcState::Sleeping => ListId::Sleeping,
            ProcState::Runnable => ListId::Ready(priority),
            ProcState::Running => ListId::Running,
            ProcState::Zombie => ListId::Zombie,
        }
    }
}

impl fmt::Display for ListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListId::Unused => f.write_str("unused"),
            ListId::Embryo => f.write_str("embryo"),
            ListId::Sleeping => f.write_str("sleeping"),
            ListId::Running => f.write_str("running"),
            ListId::Zombie => f.write_str("zombie"),
            ListId::Ready(prio) => write!(f, "ready[{}]", prio),
        }
    }
}

/// A slot was not on the list it was removed from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotInList {
    pub list: ListId,
    pub slot: SlotId,
}

/// Head, tail and length of one list
#[derive(Debug, Clone, Copy, Default)]
pub struct StateList {
    head: Option<SlotId>,
    tail: Option<SlotId>,
    len: usize,
}

impl StateList {
    pub const fn new() -> Self {
        Self { head: None, tail: None, len: 0 }
    }

    pub fn head(&self) -> Option<SlotId> {
        self.head
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    fn push_back(&mut self, links: &mut [Option<SlotId>; NPROC], slot: SlotId) {
        links[slot] = None;
        match self.tail {
            Some(tail) => links[tail] = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.len += 1;
    }

    fn pop_front(&mut self, links: &mut [Option<SlotId>; NPROC]) -> Option<SlotId> {
        let head = self.head?;
        self.head = links[head].take();
        if self.head.is_none() {
            self.tail = None;
        }
        self.len -= 1;
        Some(head)
    }

    /// Unlinks `slot`, scanning from the head. Returns `false` if absent.
    fn remove(&mut self, links: &mut [Option<SlotId>; NPROC], slot: SlotId) -> bool {
        let mut prev: Option<SlotId> = None;
        let mut cursor = self.head;
        while let Some(current) = cursor {
            if current == slot {
                let next = links[current].take();
                match prev {
                    Some(p) => links[p] = next,
                    None => self.head = next,
                }
                if self.tail == Some(current) {
                    self.tail = prev;
                }
                self.len -= 1;
                return true;
            }
            prev = cursor;
            cursor = links[current];
        }
        false
    }
}

/// Iterator over the slots of one list, head first
pub struct ListIter<'a> {
    links: &'a [Option<SlotId>; NPROC],
    cursor: Option<SlotId>,
    remaining: usize,
}

impl Iterator for ListIter<'_> {
    type Item = SlotId;

    fn next(&mut self) -> Option<SlotId> {
        // Bounded by the recorded length so a corrupted cycle cannot spin forever
        if self.remaining == 0 {
            return None;
        }
        let slot = self.cursor?;
        self.cursor = self.links[slot];
        self.remaining -= 1;
        Some(slot)
    }
}

/// All membership lists of the process table
pub struct StateLists {
    links: [Option<SlotId>; NPROC],
    unused: StateList,
    embryo: StateList,
    sleeping: StateList,
    running: StateList,
    zombie: StateList,
    ready: [StateList; PRIORITY_LEVELS],
    /// Bit `p` set iff ready list `p` is non-empty
    ready_mask: u64,
}

impl StateLists {
    /// Empty lists; the caller threads every slot onto one of them
    pub const fn new() -> Self {
        Self {
            links: [None; NPROC],
            unused: StateList::new(),
            embryo: StateList::new(),
            sleeping: StateList::new(),
            running: StateList::new(),
            zombie: StateList::new(),
            ready: [StateList::new(); PRIORITY_LEVELS],
            ready_mask: 0,
        }
    }

    fn list(&self, id: ListId) -> &StateList {
        match id {
            ListId::Unused => &self.unused,
            ListId::Embryo => &self.embryo,
            ListId::Sleeping => &self.sleeping,
            ListId::Running => &self.running,
            ListId::Zombie => &self.zombie,
            ListId::Ready(prio) => &self.ready[prio as usize],
        }
    }

    fn list_and_links(&mut self, id: ListId) -> (&mut StateList, &mut [Option<SlotId>; NPROC]) {
        let list = match id {
            ListId::Unused => &mut self.unused,
            ListId::Embryo => &mut self.embryo,
            ListId::Sleeping => &mut self.sleeping,
            ListId::Running => &mut self.running,
            ListId::Zombie => &mut self.zombie,
            ListId::Ready(prio) => &mut self.ready[prio as usize],
        };
        (list, &mut self.links)
    }

    fn refresh_mask(&mut self, id: ListId) {
        if let ListId::Ready(prio) = id {
            if self.ready[prio as usize].is_empty() {
                self.ready_mask &= !(1u64 << prio);
            } else {
                self.ready_mask |= 1u64 << prio;
            }
        }
    }

    /// Appends `slot` at the tail of `id`
    pub fn add(&mut self, id: ListId, slot: SlotId) {
        let (list, links) = self.list_and_links(id);
        list.push_back(links, slot);
        self.refresh_mask(id);
    }

    /// Removes `slot` from `id`
    pub fn remove(&mut self, id: ListId, slot: SlotId) -> Result<(), NotInList> {
        let (list, links) = self.list_and_links(id);
        if !list.remove(links, slot) {
            return Err(NotInList { list: id, slot });
        }
        self.refresh_mask(id);
        Ok(())
    }

    /// Detaches and returns the head of `id`
    pub fn pop_front(&mut self, id: ListId) -> Option<SlotId> {
        let (list, links) = self.list_and_links(id);
        let slot = list.pop_front(links);
        self.refresh_mask(id);
        slot
    }

    pub fn head(&self, id: ListId) -> Option<SlotId> {
        self.list(id).head()
    }

    pub fn len(&self, id: ListId) -> usize {
        self.list(id).len()
    }

    pub fn is_empty(&self, id: ListId) -> bool {
        self.list(id).is_empty()
    }

    pub fn contains(&self, id: ListId, slot: SlotId) -> bool {
        self.iter(id).any(|s| s == slot)
    }

    pub fn iter(&self, id: ListId) -> ListIter<'_> {
        let list = self.list(id);
        ListIter { links: &self.links, cursor: list.head, remaining: list.len }
    }

    /// Highest priority whose ready list is non-empty
    pub fn highest_ready(&self) -> Option<Priority> {
        if self.ready_mask == 0 {
            None
        } else {
            Some(63 - self.ready_mask.leading_zeros())
        }
    }

    pub(crate) fn ready_mask(&self) -> u64 {
        self.ready_mask
    }

    /// Walks a list by its links alone, ignoring the recorded length.
    /// Used by consistency checks to detect a length that disagrees with the chain.
    pub(crate) fn chain_len(&self, id: ListId) -> usize {
        let mut count = 0;
        let mut cursor = self.list(id).head;
        while let Some(slot) = cursor {
            count += 1;
            if count > NPROC {
                break;
            }
            cursor = self.links[slot];
        }
        count
    }

    /// Most recently added slot of a list
    pub fn tail(&self, id: ListId) -> Option<SlotId> {
        self.list(id).tail
    }
}

impl Default for StateLists {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    fn collect(lists: &StateLists, id: ListId) -> Vec<SlotId> {
        lists.iter(id).collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut lists = StateLists::new();
        for slot in [4, 1, 7] {
            lists.add(ListId::Sleeping, slot);
        }
        assert_eq!(collect(&lists, ListId::Sleeping), [4, 1, 7]);
        assert_eq!(lists.pop_front(ListId::Sleeping), Some(4));
        assert_eq!(lists.len(ListId::Sleeping), 2);
    }

    #[test]
    fn test_remove_head_middle_tail() {
        let mut lists = StateLists::new();
        for slot in 0..5 {
            lists.add(ListId::Zombie, slot);
        }
        lists.remove(ListId::Zombie, 0).unwrap();
        lists.remove(ListId::Zombie, 2).unwrap();
        lists.remove(ListId::Zombie, 4).unwrap();
        assert_eq!(collect(&lists, ListId::Zombie), [1, 3]);
        assert_eq!(lists.tail(ListId::Zombie), Some(3));

        // Tail must be usable after removing the old tail
        lists.add(ListId::Zombie, 9);
        assert_eq!(collect(&lists, ListId::Zombie), [1, 3, 9]);
    }

    #[test]
    fn test_remove_missing_reports_not_found() {
        let mut lists = StateLists::new();
        assert_eq!(
            lists.remove(ListId::Running, 3),
            Err(NotInList { list: ListId::Running, slot: 3 })
        );
        lists.add(ListId::Running, 1);
        assert!(lists.remove(ListId::Running, 3).is_err());
        assert_eq!(collect(&lists, ListId::Running), [1]);
    }

    #[test]
    fn test_remove_only_element_resets_list() {
        let mut lists = StateLists::new();
        lists.add(ListId::Embryo, 5);
        lists.remove(ListId::Embryo, 5).unwrap();
        assert!(lists.is_empty(ListId::Embryo));
        assert_eq!(lists.tail(ListId::Embryo), None);
        assert_eq!(lists.pop_front(ListId::Embryo), None);
    }

    #[test]
    fn test_ready_mask_tracks_levels() {
        let mut lists = StateLists::new();
        assert_eq!(lists.highest_ready(), None);
        lists.add(ListId::Ready(2), 0);
        lists.add(ListId::Ready(5), 1);
        assert_eq!(lists.highest_ready(), Some(5));
        assert_eq!(lists.pop_front(ListId::Ready(5)), Some(1));
        assert_eq!(lists.highest_ready(), Some(2));
        lists.remove(ListId::Ready(2), 0).unwrap();
        assert_eq!(lists.highest_ready(), None);
    }

    #[test]
    fn test_top_level_uses_highest_mask_bit() {
        let top = (PRIORITY_LEVELS - 1) as Priority;
        let mut lists = StateLists::new();
        lists.add(ListId::Ready(0), 3);
        lists.add(ListId::Ready(top), 4);
        assert_eq!(lists.ready_mask(), 1 | (1u64 << top));
        assert_eq!(lists.highest_ready(), Some(top));
        assert_eq!(lists.pop_front(ListId::Ready(top)), Some(4));
        assert_eq!(lists.highest_ready(), Some(0));
    }

    #[test]
    fn test_list_for_state() {
        assert_eq!(ListId::for_state(ProcState::Runnable, 3), ListId::Ready(3));
        assert_eq!(ListId::for_state(ProcState::Sleeping, 3), ListId::Sleeping);
    }
}
