//! Policy callbacks consulted during resolution.
//!
//! Hooks only ever see collections they can shrink. A hook that returns an
//! error is treated as having filtered nothing for that call: its removals are
//! rolled back and a warning is logged.

use std::sync::Arc;

use tracing::warn;

use crate::models::{Capability, Requirement, Revision, RevisionId};

pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// A collection that supports removal only.
pub struct Shrinkable<'a, T> {
    items: &'a mut Vec<T>,
}

impl<'a, T> Shrinkable<'a, T> {
    pub fn new(items: &'a mut Vec<T>) -> Self {
        Self { items }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.items.retain(keep);
    }

    pub fn remove(&mut self, index: usize) -> Option<T> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

pub trait ResolverHook {
    fn filter_resolvable(
        &mut self,
        _candidates: &mut Shrinkable<'_, Arc<Revision>>,
    ) -> Result<(), HookError> {
        Ok(())
    }

    fn filter_singleton_collisions(
        &mut self,
        _singleton: &Capability,
        _collisions: &mut Shrinkable<'_, Arc<Capability>>,
    ) -> Result<(), HookError> {
        Ok(())
    }

    fn filter_matches(
        &mut self,
        _requirement: &Requirement,
        _candidates: &mut Shrinkable<'_, Arc<Capability>>,
    ) -> Result<(), HookError> {
        Ok(())
    }

    /// Called once the resolve call that created this hook is finished.
    fn end(&mut self) {}
}

/// Creates one hook per resolve call.
pub trait ResolverHookFactory: Send + Sync {
    fn begin(&self, triggers: &[RevisionId]) -> Box<dyn ResolverHook>;
}

impl<F> ResolverHookFactory for F
where
    F: Fn(&[RevisionId]) -> Box<dyn ResolverHook> + Send + Sync,
{
    fn begin(&self, triggers: &[RevisionId]) -> Box<dyn ResolverHook> {
        self(triggers)
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Resolvable,
    SingletonCollisions,
    Matches,
}

/// The hooks of one resolve call, in factory registration order.
pub struct HookChain {
    hooks: Vec<Box<dyn ResolverHook>>,
    ended: bool,
}

impl HookChain {
    pub fn begin(factories: &[Arc<dyn ResolverHookFactory>], triggers: &[RevisionId]) -> Self {
        Self {
            hooks: factories.iter().map(|f| f.begin(triggers)).collect(),
            ended: false,
        }
    }

    pub fn empty() -> Self {
        Self {
            hooks: Vec::new(),
            ended: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    fn run<T: Clone>(
        &mut self,
        phase: Phase,
        items: &mut Vec<T>,
        mut call: impl FnMut(&mut dyn ResolverHook, &mut Shrinkable<'_, T>) -> Result<(), HookError>,
    ) {
        for (position, hook) in self.hooks.iter_mut().enumerate() {
            let before = items.clone();
            let mut view = Shrinkable::new(items);
            if let Err(error) = call(hook.as_mut(), &mut view) {
                warn!(hook = position, ?phase, %error, "resolver hook failed; ignoring its filtering");
                *items = before;
            }
        }
    }

    pub fn filter_resolvable(&mut self, candidates: &mut Vec<Arc<Revision>>) {
        self.run(Phase::Resolvable, candidates, |hook, view| {
            hook.filter_resolvable(view)
        });
    }

    pub fn filter_singleton_collisions(
        &mut self,
        singleton: &Capability,
        collisions: &mut Vec<Arc<Capability>>,
    ) {
        self.run(Phase::SingletonCollisions, collisions, |hook, view| {
            hook.filter_singleton_collisions(singleton, view)
        });
    }

    pub fn filter_matches(&mut self, requirement: &Requirement, candidates: &mut Vec<Arc<Capability>>) {
        self.run(Phase::Matches, candidates, |hook, view| {
            hook.filter_matches(requirement, view)
        });
    }

    pub fn end(&mut self) {
        if !self.ended {
            self.ended = true;
            for hook in &mut self.hooks {
                hook.end();
            }
        }
    }
}

impl Drop for HookChain {
    fn drop(&mut self) {
        self.end();
    }
}
