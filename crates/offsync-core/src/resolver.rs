//! Conflict resolvers.
//!
//! A resolver is handed the server copy and the client copy of an object
//! whose etags diverged while the client held a local edit. It must return
//! one of the two references it was given; it selects, it never merges.
//! [`Resolution::classify`] is how callers check that contract.

use std::fmt;

use crate::object::CachedObject;

/// Chooses between a server copy and a client copy of the same object.
pub trait ConflictResolver: Send + Sync {
    /// Return `server` or `client`. Returning any other reference is a
    /// contract violation reported by the caller.
    fn resolve<'a>(&self, server: &'a CachedObject, client: &'a CachedObject) -> &'a CachedObject;
}

/// Always keeps the server copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferServer;

impl ConflictResolver for PreferServer {
    fn resolve<'a>(&self, server: &'a CachedObject, _client: &'a CachedObject) -> &'a CachedObject {
        server
    }
}

/// Always keeps the client copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferClient;

impl ConflictResolver for PreferClient {
    fn resolve<'a>(&self, _server: &'a CachedObject, client: &'a CachedObject) -> &'a CachedObject {
        client
    }
}

/// A resolver backed by a closure.
pub struct FnResolver<F>(F);

impl<F> FnResolver<F>
where
    F: for<'a> Fn(&'a CachedObject, &'a CachedObject) -> &'a CachedObject + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ConflictResolver for FnResolver<F>
where
    F: for<'a> Fn(&'a CachedObject, &'a CachedObject) -> &'a CachedObject + Send + Sync,
{
    fn resolve<'a>(&self, server: &'a CachedObject, client: &'a CachedObject) -> &'a CachedObject {
        (self.0)(server, client)
    }
}

impl<F> fmt::Debug for FnResolver<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnResolver")
    }
}

/// Which argument a resolver picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Server,
    Client,
}

impl Resolution {
    /// Identify `chosen` by reference identity. `None` when it is neither
    /// argument, even if it compares equal to one of them.
    pub fn classify(server: &CachedObject, client: &CachedObject, chosen: &CachedObject) -> Option<Self> {
        if std::ptr::eq(chosen, server) {
            Some(Resolution::Server)
        } else if std::ptr::eq(chosen, client) {
            Some(Resolution::Client)
        } else {
            None
        }
    }

    /// Run `resolver` and classify its choice.
    pub fn of(
        resolver: &dyn ConflictResolver,
        server: &CachedObject,
        client: &CachedObject,
    ) -> Option<Self> {
        let chosen = resolver.resolve(server, client);
        Self::classify(server, client, chosen)
    }
}
