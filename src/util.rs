// Copyright © 2021-2022
// Author: Antonio Caggiano <info@antoniocaggiano.eu>
// SPDX-License-Identifier: MIT

use std::ops::Deref;
use std::{
    hash::{Hash, Hasher},
    marker::PhantomData,
};

/// A handle is a sort of index into a vector of elements of a specific kind.
/// It is useful when we do not want to keep a reference to an element,
/// while taking advantage of strong typing to avoid using integers.
#[derive(Debug)]
pub struct Handle<T> {
    pub id: usize,
    phantom: PhantomData<*const T>,
}

impl<T> Handle<T> {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            phantom: PhantomData,
        }
    }

    pub fn none() -> Self {
        Self {
            id: std::usize::MAX,
            phantom: PhantomData,
        }
    }

    pub fn valid(&self) -> bool {
        self.id != std::usize::MAX
    }
}

impl<'a, T> Handle<T> {
    pub fn get(&self, pack: &'a Pack<T>) -> Option<&'a T> {
        pack.vec.get(self.id)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// A `Pack` is an append-only arena of contiguous elements addressed by
/// `Handle`s. Built resources never move once pushed, which keeps handles
/// stable for the whole lifetime of a scene.
pub struct Pack<T> {
    vec: Vec<T>,
}

impl<T> Pack<T> {
    pub fn new() -> Self {
        Self { vec: vec![] }
    }

    pub fn push(&mut self, elem: T) -> Handle<T> {
        let id = self.vec.len();
        self.vec.push(elem);
        Handle::new(id)
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        if !handle.valid() {
            return None;
        }
        self.vec.get(handle.id)
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        if !handle.valid() {
            return None;
        }
        self.vec.get_mut(handle.id)
    }
}

impl<T> Deref for Pack<T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Self::Target {
        &self.vec
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;

    #[derive(Debug)]
    struct Thing {
        val: u32,
    }

    impl Thing {
        fn new(val: u32) -> Self {
            Thing { val }
        }
    }

    #[test]
    fn compare() {
        let a = Handle::<Thing>::new(0);
        let b = a;
        assert_eq!(a, b);
        assert_ne!(a, Handle::none());
    }

    #[test]
    fn none_resolves_to_nothing() {
        let mut pack = Pack::new();
        pack.push(Thing::new(1));
        assert!(pack.get(Handle::none()).is_none());
    }

    #[test]
    fn contain() {
        let mut map = HashMap::<Handle<Thing>, Thing>::new();
        let h = Handle::new(0);
        map.insert(h, Thing::new(1));
        assert!(map.contains_key(&h));
    }

    #[test]
    fn simple() {
        let mut pack = Pack::new();
        let thing = pack.push(Thing { val: 2 });
        assert_eq!(thing.get(&pack).unwrap().val, 2);
        assert_eq!(pack.get(thing).unwrap().val, 2);
    }

    #[test]
    fn multiple() {
        let mut pack = Pack::new();
        let mut handles = vec![];

        for i in 0..4 {
            let handle = pack.push(Thing { val: i });
            handles.push(handle);
        }

        for i in 0..4u32 {
            assert_eq!(handles[i as usize].get(&pack).unwrap().val, i);
            assert_eq!(pack.get(handles[i as usize]).unwrap().val, i);
        }
    }

    #[test]
    fn handles_stay_stable() {
        let mut pack = Pack::new();
        let first = pack.push(Thing::new(0));
        for i in 1..100 {
            pack.push(Thing::new(i));
        }
        assert_eq!(pack.get(first).unwrap().val, 0);
        assert_eq!(pack.len(), 100);
    }
}
