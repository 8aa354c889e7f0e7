//! Mirror Registry
//!
//! Maps tree ids to their mirrors. Mirrors are created on first use and live
//! until explicitly evicted, typically when the host deletes the tree.
//!
//! Embedders normally own a registry and pass it down. A process-wide
//! instance is available through [`MirrorRegistry::global`] for hosts that
//! can only reach the core through free functions.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::Mutex;
use tracing::debug;

use super::event::TreeEvent;
use super::mirror::GraphMirror;
use super::node::TreeId;
use super::scheduler::{Recalculated, WorthRecalculating};
use crate::config::UpdateConfig;
use crate::error::UpdateResult;
use crate::host::{HostGraph, NodeProcessor};

static GLOBAL: OnceLock<Mutex<MirrorRegistry>> = OnceLock::new();

/// Owner of every mirror, keyed by tree id.
#[derive(Debug, Default)]
pub struct MirrorRegistry {
    mirrors: HashMap<TreeId, GraphMirror>,
    config: UpdateConfig,
}

impl MirrorRegistry {
    pub fn new(config: UpdateConfig) -> Self {
        Self {
            mirrors: HashMap::new(),
            config,
        }
    }

    /// The process-wide registry, created with default configuration.
    pub fn global() -> &'static Mutex<MirrorRegistry> {
        GLOBAL.get_or_init(|| Mutex::new(MirrorRegistry::default()))
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: UpdateConfig) {
        self.config = config;
    }

    /// Return the mirror for `tree`, creating an empty one if needed.
    pub fn get_or_create(&mut self, tree: &TreeId) -> &mut GraphMirror {
        self.mirrors.entry(tree.clone()).or_insert_with(|| {
            debug!(%tree, "new tree mirror");
            GraphMirror::new(tree.clone())
        })
    }

    pub fn get(&self, tree: &TreeId) -> Option<&GraphMirror> {
        self.mirrors.get(tree)
    }

    pub fn get_mut(&mut self, tree: &TreeId) -> Option<&mut GraphMirror> {
        self.mirrors.get_mut(tree)
    }

    /// Drop the mirror of a deleted tree.
    pub fn evict(&mut self, tree: &TreeId) -> Option<GraphMirror> {
        let evicted = self.mirrors.remove(tree);
        if evicted.is_some() {
            debug!(%tree, "tree mirror evicted");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.mirrors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

    pub fn tree_ids(&self) -> impl Iterator<Item = &TreeId> {
        self.mirrors.keys()
    }

    /// Apply a batch of events to the mirror of `tree`.
    pub fn update_reconstruction<H: HostGraph + ?Sized>(
        &mut self,
        host: &H,
        tree: &TreeId,
        events: &[TreeEvent],
    ) -> UpdateResult<()> {
        let mirror = self
            .mirrors
            .entry(tree.clone())
            .or_insert_with(|| GraphMirror::new(tree.clone()));
        mirror.update_reconstruction(host, events, &self.config)
    }

    /// Nodes of `tree` to recompute, in dependency order.
    pub fn walk_worth_recalculating<H: HostGraph + ?Sized>(
        &mut self,
        host: &H,
        tree: &TreeId,
    ) -> UpdateResult<WorthRecalculating> {
        let mirror = self
            .mirrors
            .entry(tree.clone())
            .or_insert_with(|| GraphMirror::new(tree.clone()));
        if mirror.needs_full_resync() {
            mirror.full_resync(host)?;
        }
        mirror.walk_worth_recalculating(host, &self.config)
    }

    /// Walk `tree` and recompute every node worth recalculating.
    pub fn recalculate<H, P>(
        &mut self,
        host: &H,
        tree: &TreeId,
        processor: &mut P,
    ) -> UpdateResult<Vec<Recalculated>>
    where
        H: HostGraph + ?Sized,
        P: NodeProcessor + ?Sized,
    {
        let mirror = self
            .mirrors
            .entry(tree.clone())
            .or_insert_with(|| GraphMirror::new(tree.clone()));
        if mirror.needs_full_resync() {
            mirror.full_resync(host)?;
        }
        mirror.recalculate(host, processor, &self.config)
    }
}
