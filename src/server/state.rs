use crate::{
    common::data::{
        Filter, InboundRequest, LastRequestEntry, StubConfig, StubDefinition, ANY_METHOD,
    },
    server::{
        matcher::PathPattern,
        state::Error::{NotFound, ValidationError},
    },
};
use http::{HeaderName, HeaderValue, Method, StatusCode};
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("no stub found with id {0}")]
    NotFound(usize),
}

pub struct StubServerState {
    history_limit: usize,
    next_stub_id: usize,
    next_request_id: usize,
    stubs: BTreeMap<usize, Arc<StubConfig>>,
    /// Stub ids by exact path.
    exact_paths: HashMap<String, Vec<usize>>,
    /// Ids of stubs whose path is a pattern.
    pattern_stubs: Vec<usize>,
    history: VecDeque<Arc<LastRequestEntry>>,
}

impl StubServerState {
    pub fn new(history_limit: usize) -> Self {
        StubServerState {
            history_limit,
            next_stub_id: 0,
            next_request_id: 0,
            stubs: BTreeMap::new(),
            exact_paths: HashMap::new(),
            pattern_stubs: Vec::new(),
            history: VecDeque::new(),
        }
    }

    fn index(&mut self, stub: &StubConfig) {
        match stub.path_pattern {
            Some(_) => self.pattern_stubs.push(stub.id),
            None => self
                .exact_paths
                .entry(stub.path().to_string())
                .or_default()
                .push(stub.id),
        }
    }

    fn unindex(&mut self, stub: &StubConfig) {
        if stub.path_pattern.is_some() {
            self.pattern_stubs.retain(|id| *id != stub.id);
            return;
        }

        if let Some(ids) = self.exact_paths.get_mut(stub.path()) {
            ids.retain(|id| *id != stub.id);
            if ids.is_empty() {
                self.exact_paths.remove(stub.path());
            }
        }
    }
}

/// Storage for stubs and the request history. Every operation is atomic with respect to the
/// others.
pub(crate) trait StateManager {
    fn reset(&self);

    fn create_stub(&self, definition: StubDefinition) -> Result<Arc<StubConfig>, Error>;
    fn read_stub(&self, id: usize) -> Result<Arc<StubConfig>, Error>;
    fn find_stubs(&self, filter: &Filter) -> Vec<Arc<StubConfig>>;
    fn delete_stubs(&self, filter: &Filter) -> usize;

    /// Returns the stubs that can possibly match `path`: stubs registered for exactly this path
    /// followed by every stub with a path pattern. Callers still have to check the pattern.
    fn stubs_for_path(&self, path: &str) -> Vec<Arc<StubConfig>>;

    fn record_request(&self, request: InboundRequest) -> Arc<LastRequestEntry>;
    fn find_requests(&self, filter: &Filter) -> Vec<Arc<LastRequestEntry>>;
    fn delete_requests(&self, filter: &Filter) -> usize;
}

pub struct HttpStubStateManager {
    state: Mutex<StubServerState>,
}

impl HttpStubStateManager {
    pub fn new(history_limit: usize) -> Self {
        Self {
            state: Mutex::new(StubServerState::new(history_limit)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StubServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for HttpStubStateManager {
    fn default() -> Self {
        HttpStubStateManager::new(usize::MAX)
    }
}

impl StateManager for HttpStubStateManager {
    fn reset(&self) {
        let mut state = self.lock();
        let history_limit = state.history_limit;
        *state = StubServerState::new(history_limit);
    }

    fn create_stub(&self, definition: StubDefinition) -> Result<Arc<StubConfig>, Error> {
        validate(&definition)?;
        let path_pattern = PathPattern::parse(&definition.path);

        let mut state = self.lock();

        let id = state.next_stub_id;
        state.next_stub_id += 1;

        let stub = Arc::new(StubConfig::new(id, definition, path_pattern));
        state.index(&stub);
        state.stubs.insert(id, stub.clone());

        tracing::debug!(
            "Added stub with id={} for {} {}",
            id,
            stub.method(),
            stub.path()
        );

        Ok(stub)
    }

    fn read_stub(&self, id: usize) -> Result<Arc<StubConfig>, Error> {
        self.lock().stubs.get(&id).cloned().ok_or(NotFound(id))
    }

    fn find_stubs(&self, filter: &Filter) -> Vec<Arc<StubConfig>> {
        self.lock()
            .stubs
            .values()
            .filter(|stub| filter.matches(stub.id, stub.method(), stub.path()))
            .cloned()
            .collect()
    }

    fn delete_stubs(&self, filter: &Filter) -> usize {
        let mut state = self.lock();

        let ids: Vec<usize> = state
            .stubs
            .values()
            .filter(|stub| filter.matches(stub.id, stub.method(), stub.path()))
            .map(|stub| stub.id)
            .collect();

        for id in &ids {
            if let Some(stub) = state.stubs.remove(id) {
                state.unindex(&stub);
            }
        }

        tracing::debug!("Deleted {} stub(s) for filter {:?}", ids.len(), filter);

        ids.len()
    }

    fn stubs_for_path(&self, path: &str) -> Vec<Arc<StubConfig>> {
        let state = self.lock();

        state
            .exact_paths
            .get(path)
            .into_iter()
            .flatten()
            .chain(state.pattern_stubs.iter())
            .filter_map(|id| state.stubs.get(id).cloned())
            .collect()
    }

    fn record_request(&self, request: InboundRequest) -> Arc<LastRequestEntry> {
        let mut state = self.lock();

        let id = state.next_request_id;
        state.next_request_id += 1;

        let entry = Arc::new(LastRequestEntry::new(id, request));
        state.history.push_back(entry.clone());
        while state.history.len() > state.history_limit {
            state.history.pop_front();
        }

        entry
    }

    fn find_requests(&self, filter: &Filter) -> Vec<Arc<LastRequestEntry>> {
        self.lock()
            .history
            .iter()
            .filter(|entry| filter.matches(entry.id, &entry.method, &entry.path))
            .cloned()
            .collect()
    }

    fn delete_requests(&self, filter: &Filter) -> usize {
        let mut state = self.lock();
        let before = state.history.len();
        state
            .history
            .retain(|entry| !filter.matches(entry.id, &entry.method, &entry.path));
        before - state.history.len()
    }
}

fn validate(definition: &StubDefinition) -> Result<(), Error> {
    if definition.method != ANY_METHOD {
        Method::from_bytes(definition.method.as_bytes()).map_err(|_| {
            ValidationError(format!("invalid HTTP method '{}'", definition.method))
        })?;
    }

    if !definition.path.starts_with('/') {
        return Err(ValidationError(format!(
            "path '{}' must start with '/'",
            definition.path
        )));
    }

    let response = &definition.response;
    StatusCode::from_u16(response.status_code).map_err(|_| {
        ValidationError(format!("invalid status code {}", response.status_code))
    })?;

    for (name, value) in &response.headers {
        HeaderName::from_str(name)
            .map_err(|_| ValidationError(format!("invalid response header name '{}'", name)))?;
        HeaderValue::from_str(value).map_err(|_| {
            ValidationError(format!("invalid value for response header '{}'", name))
        })?;
    }

    Ok(())
}
