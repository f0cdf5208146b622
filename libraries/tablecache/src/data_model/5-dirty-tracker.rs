//! # DirtyTracker
//! A DirtyTracker is a wrapper around any value that adds a "dirty" flag. It records that listeners
//! need to hear about a change, and which listener (if any) made the change and so can be skipped.

use std::ops::{Deref, DerefMut};

use crate::data_model::ListenerKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DirtyState {
    /// Not dirty, no pending notifications
    #[default]
    Clean,
    /// Dirty, notify all listeners except the specified one
    DirtyExcept(ListenerKey),
    /// Dirty, notify all listeners
    DirtyAll,
}

impl DirtyState {
    pub fn mark(&mut self, modifier: Option<ListenerKey>) {
        use DirtyState::*;
        *self = match (*self, modifier) {
            (Clean, Some(key)) => DirtyExcept(key),
            (DirtyExcept(key1), Some(key2)) if key1 == key2 => DirtyExcept(key1),
            (Clean, None) => DirtyAll,
            (DirtyExcept(_), _) | (DirtyAll, _) => DirtyAll,
        };
    }

    /// Resets to clean. Returns `None` if there was nothing to notify, otherwise the listener to skip.
    pub fn take(&mut self) -> Option<Option<ListenerKey>> {
        let excluded = match *self {
            DirtyState::Clean => return None,
            DirtyState::DirtyExcept(key) => Some(key),
            DirtyState::DirtyAll => None,
        };
        *self = DirtyState::Clean;
        Some(excluded)
    }

    pub fn is_dirty(&self) -> bool {
        !matches!(self, DirtyState::Clean)
    }
}

#[derive(Clone, Debug, Default)]
pub struct DirtyTracker<T> {
    value: T,
    pub dirty_state: DirtyState,
}

/// Smart pointer that marks the value as dirty when dereferenced mutably
pub struct DirtyOnDerefMut<'a, T> {
    value: &'a mut T,
    dirty_state: &'a mut DirtyState,
    modifier: Option<ListenerKey>,
}

impl<T> Deref for DirtyOnDerefMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.value
    }
}

impl<T> DerefMut for DirtyOnDerefMut<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.dirty_state.mark(self.modifier);
        self.value
    }
}

impl<T> DirtyTracker<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            dirty_state: DirtyState::Clean,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub(crate) fn get_mut(&mut self, modifier: Option<ListenerKey>) -> DirtyOnDerefMut<'_, T> {
        DirtyOnDerefMut {
            value: &mut self.value,
            dirty_state: &mut self.dirty_state,
            modifier,
        }
    }
}

impl<T: PartialEq> DirtyTracker<T> {
    /// Replaces the value, marking it dirty only if it actually changed.
    pub(crate) fn replace(&mut self, value: T, modifier: Option<ListenerKey>) -> bool {
        if self.value == value {
            return false;
        }
        *self.get_mut(modifier) = value;
        true
    }
}
