//! Binding compiler.
//!
//! Turns the link registry into per-follower binding lists:
//!
//! | mode | follower advertised it | follower tags match query |
//! |------|------------------------|---------------------------|
//! | SEND | SOURCE `source_key`    | -                         |
//! | RECV | -                      | SINK `dest_key`           |
//! | SYNC | SOURCE `source_key`    | SINK `dest_key`           |
//!
//! Lists are split into datagram-sized chunks. The whole set is recompiled
//! and resent every coordination cycle.

use std::net::IpAddr;

use hivelink_link::Mode;
use hivelink_wire::{Binding, MAX_BIND_ENTRIES_PER_DATAGRAM};

use crate::link_registry::LinkRegistry;
use crate::membership::{Follower, FollowerView};

/// Bindings of one follower, split into chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledBindings {
    pub ip: IpAddr,
    /// Never empty; each chunk holds at most the compiler's chunk size.
    pub chunks: Vec<Vec<Binding>>,
}

impl CompiledBindings {
    pub fn total(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BindingCompiler {
    chunk_size: usize,
}

impl Default for BindingCompiler {
    fn default() -> Self {
        Self {
            chunk_size: MAX_BIND_ENTRIES_PER_DATAGRAM,
        }
    }
}

impl BindingCompiler {
    /// Compiler flushing every `chunk_size` bindings, clamped to what fits
    /// in one datagram.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.clamp(1, MAX_BIND_ENTRIES_PER_DATAGRAM),
        }
    }

    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Chunked bindings for one follower, in registry identity order.
    ///
    /// Empty when the follower has nothing bound.
    pub fn compile(&self, registry: &LinkRegistry, follower: &Follower) -> Vec<Vec<Binding>> {
        let mut chunks = Vec::new();
        let mut current = Vec::with_capacity(self.chunk_size);

        let mut push = |binding: Binding, current: &mut Vec<Binding>| {
            current.push(binding);
            if current.len() == self.chunk_size {
                chunks.push(std::mem::replace(current, Vec::with_capacity(self.chunk_size)));
            }
        };

        for (_, entry) in registry.iter() {
            let link = entry.link();
            let sources = entry.contains(follower.ip);
            let sinks = link.query().matches(&follower.tags);
            match link.mode() {
                Mode::Send if sources => {
                    push(Binding::source(link.source_key(), link.rate()), &mut current);
                }
                Mode::Recv if sinks => {
                    push(Binding::sink(link.dest_key(), link.rate()), &mut current);
                }
                Mode::Sync => {
                    if sources {
                        push(Binding::source(link.source_key(), link.rate()), &mut current);
                    }
                    if sinks {
                        push(Binding::sink(link.dest_key(), link.rate()), &mut current);
                    }
                }
                _ => {}
            }
        }

        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }

    /// Compile for every follower with at least one binding.
    pub fn compile_all<V>(&self, registry: &LinkRegistry, view: &V) -> Vec<CompiledBindings>
    where
        V: FollowerView + ?Sized,
    {
        view.followers()
            .filter_map(|f| {
                let chunks = self.compile(registry, f);
                (!chunks.is_empty()).then(|| CompiledBindings { ip: f.ip, chunks })
            })
            .collect()
    }
}
