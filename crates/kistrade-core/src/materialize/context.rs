use std::any::TypeId;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::hash::BuildHasher;
use std::sync::{Arc, Weak};

use crate::client::{ClientInner, KisClient};
use crate::http_client::HttpResponse;

use super::schema::Shape;

/// Non-owning back-reference from a materialized value to its client.
#[derive(Clone, Default)]
pub struct Owner {
    client: Option<Weak<ClientInner>>,
}

impl Owner {
    /// The owning client, if bound and still alive.
    pub fn client(&self) -> Option<KisClient> {
        self.client
            .as_ref()
            .and_then(Weak::upgrade)
            .map(KisClient::from_inner)
    }

    pub fn is_bound(&self) -> bool {
        self.client.is_some()
    }

    /// Identity comparison against `client`.
    pub fn is(&self, client: &KisClient) -> bool {
        self.client
            .as_ref()
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(client.inner())))
    }

    fn bind(&mut self, client: &KisClient) {
        self.client = Some(Arc::downgrade(client.inner()));
    }
}

impl Debug for Owner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Owner")
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// A shape that carries an owner back-reference.
pub trait Materialized: Shape + 'static {
    fn owner(&self) -> &Owner;

    fn owner_mut(&mut self) -> &mut Owner;

    /// Bind nested materialized values through `binder`.
    ///
    /// Every field holding materialized values must be passed on here. Leaf
    /// shapes implement this with an empty body.
    fn bind_children(&mut self, binder: &mut Binder<'_>);

    /// Post-initialization hook, run once after the owner is bound.
    fn on_bound(&mut self) {}

    /// Receive the raw response a top-level value was decoded from.
    fn attach_response(&mut self, response: Arc<HttpResponse>) {
        let _ = response;
    }
}

/// Graph positions the context walk can traverse: materialized values and
/// sequences, mappings or optionals of them.
pub trait BindContext {
    fn bind_context(&mut self, binder: &mut Binder<'_>);
}

impl<T: BindContext> BindContext for Vec<T> {
    fn bind_context(&mut self, binder: &mut Binder<'_>) {
        for item in self {
            item.bind_context(binder);
        }
    }
}

impl<T: BindContext> BindContext for Option<T> {
    fn bind_context(&mut self, binder: &mut Binder<'_>) {
        if let Some(value) = self {
            value.bind_context(binder);
        }
    }
}

impl<K, V: BindContext> BindContext for BTreeMap<K, V> {
    fn bind_context(&mut self, binder: &mut Binder<'_>) {
        for value in self.values_mut() {
            value.bind_context(binder);
        }
    }
}

impl<K, V: BindContext, S: BuildHasher> BindContext for HashMap<K, V, S> {
    fn bind_context(&mut self, binder: &mut Binder<'_>) {
        for value in self.values_mut() {
            value.bind_context(binder);
        }
    }
}

/// Depth-first context walk over one materialized graph.
///
/// A value is visited at most once per walk, keyed by address and type.
pub struct Binder<'a> {
    client: &'a KisClient,
    visited: HashSet<(usize, TypeId)>,
}

impl<'a> Binder<'a> {
    pub fn new(client: &'a KisClient) -> Self {
        Self {
            client,
            visited: HashSet::new(),
        }
    }

    /// Bind `object`, then its children, then run its hook.
    pub fn bind<T: Materialized>(&mut self, object: &mut T) {
        let address = (object as *const T).cast::<()>() as usize;
        if !self.visited.insert((address, TypeId::of::<T>())) {
            return;
        }

        object.owner_mut().bind(self.client);
        object.bind_children(self);
        object.on_bound();
    }

    /// Number of distinct values bound so far.
    pub fn visited(&self) -> usize {
        self.visited.len()
    }
}
