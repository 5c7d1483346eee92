// serve/state.rs — Shared server state and the compilation store
//
// `AppState` is cloned into every handler. The store maps compilation ids
// to their rendered typing so that the typing follow-up request reads the
// result of its own compilation; it holds at most `capacity` entries and
// evicts the least recently used one.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::config::{RendererKind, ServerConfig};
use crate::render::{DotRenderer, GraphvizRenderer, Renderer};

#[derive(Debug)]
pub struct CompilationStore {
    capacity: usize,
    entries: HashMap<Uuid, String>,
    /// Least recently used first.
    order: VecDeque<Uuid>,
}

impl CompilationStore {
    pub fn new(capacity: usize) -> Self {
        CompilationStore {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Record the typing of a compilation (`""` when typing was off).
    pub fn insert(&mut self, id: Uuid, typing: String) {
        if self.entries.insert(id, typing).is_some() {
            self.touch(id);
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }

    pub fn get(&mut self, id: &Uuid) -> Option<String> {
        let typing = self.entries.get(id).cloned()?;
        self.touch(*id);
        Some(typing)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&mut self, id: Uuid) {
        if let Some(pos) = self.order.iter().position(|x| *x == id) {
            self.order.remove(pos);
        }
        self.order.push_back(id);
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub renderer: Arc<dyn Renderer>,
    store: Arc<Mutex<CompilationStore>>,
}

impl AppState {
    /// State with the renderer selected by `config.renderer`.
    pub fn new(config: ServerConfig) -> Self {
        let renderer: Arc<dyn Renderer> = match config.renderer {
            RendererKind::Graphviz => Arc::new(GraphvizRenderer {
                command: config.graphviz_command.clone(),
                format: config.image_format,
            }),
            RendererKind::Dot => Arc::new(DotRenderer),
        };
        Self::with_renderer(config, renderer)
    }

    pub fn with_renderer(config: ServerConfig, renderer: Arc<dyn Renderer>) -> Self {
        let store = CompilationStore::new(config.typing_store_capacity);
        AppState {
            config: Arc::new(config),
            renderer,
            store: Arc::new(Mutex::new(store)),
        }
    }

    /// Lock the store. A poisoned lock still holds consistent data: every
    /// mutation completes before it could panic.
    pub fn store(&self) -> MutexGuard<'_, CompilationStore> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
