use crate::{
    common::data::{
        Body, InboundRequest, LastRequestEntry, RequestPredicates, StubConfig, ANY_METHOD,
    },
    server::state::StateManager,
};
use assert_json_diff::{assert_json_matches_no_panic, CompareMode, Config};
use path_tree::PathTree;
use std::{collections::BTreeMap, fmt, sync::Arc};

/// A stub path containing `:name` parameters or `*` wildcards.
#[derive(Clone)]
pub(crate) struct PathPattern {
    source: String,
    tree: Arc<PathTree<()>>,
}

impl PathPattern {
    /// Returns `None` for plain paths, which are matched by string equality instead.
    pub fn parse(path: &str) -> Option<Self> {
        let parameterized = path
            .split('/')
            .any(|segment| segment.starts_with(':') || segment.contains('*'));
        if !parameterized {
            return None;
        }

        let mut tree = PathTree::new();
        #[allow(unused_must_use)]
        {
            tree.insert(path, ());
        }

        Some(Self {
            source: path.to_string(),
            tree: Arc::new(tree),
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.tree.find(path).is_some()
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathPattern").field(&self.source).finish()
    }
}

/// Selects the stub that answers an inbound request.
pub(crate) struct StubMatcher<S>
where
    S: StateManager + Send + Sync + 'static,
{
    state: Arc<S>,
}

impl<S> StubMatcher<S>
where
    S: StateManager + Send + Sync + 'static,
{
    pub fn new(state: Arc<S>) -> Self {
        Self { state }
    }

    /// Records the request and returns the matching stub, if any. When several stubs match, the
    /// most recently created one wins.
    pub fn find_stub(&self, request: InboundRequest) -> Option<Arc<StubConfig>> {
        let entry = self.state.record_request(request);

        let stub = self
            .state
            .stubs_for_path(&entry.path)
            .into_iter()
            .filter(|stub| stub_matches(stub, &entry))
            .max_by_key(|stub| stub.id);

        match &stub {
            Some(stub) => tracing::debug!(
                "Request {} {} (id={}) matched stub with id={}",
                entry.method,
                entry.path,
                entry.id,
                stub.id
            ),
            None => tracing::debug!(
                "Request {} {} (id={}) did not match any stub",
                entry.method,
                entry.path,
                entry.id
            ),
        }

        stub
    }
}

fn stub_matches(stub: &StubConfig, request: &LastRequestEntry) -> bool {
    method_matches(stub.method(), &request.method)
        && path_matches(stub, &request.path)
        && predicates_match(&stub.definition.request, request)
}

fn method_matches(expected: &str, actual: &str) -> bool {
    expected == ANY_METHOD || expected.eq_ignore_ascii_case(actual)
}

fn path_matches(stub: &StubConfig, path: &str) -> bool {
    match &stub.path_pattern {
        Some(pattern) => pattern.matches(path),
        None => stub.path() == path,
    }
}

fn predicates_match(predicates: &RequestPredicates, request: &LastRequestEntry) -> bool {
    let headers = predicates
        .headers
        .as_ref()
        .map_or(true, |expected| headers_match(expected, &request.headers));
    let query = predicates
        .query
        .as_ref()
        .map_or(true, |expected| query_matches(expected, &request.query));
    let body = predicates
        .body
        .as_ref()
        .map_or(true, |expected| body_matches(expected, &request.body));

    headers && query && body
}

fn headers_match(expected: &BTreeMap<String, String>, actual: &BTreeMap<String, String>) -> bool {
    expected.iter().all(|(name, value)| {
        actual.iter().any(|(actual_name, actual_value)| {
            actual_name.eq_ignore_ascii_case(name) && actual_value == value
        })
    })
}

fn query_matches(expected: &BTreeMap<String, String>, actual: &BTreeMap<String, String>) -> bool {
    expected
        .iter()
        .all(|(name, value)| actual.get(name) == Some(value))
}

fn body_matches(expected: &serde_json::Value, body: &Body) -> bool {
    let actual = body
        .as_text()
        .and_then(|text| serde_json::from_str::<serde_json::Value>(text).ok());

    match actual {
        Some(actual) => {
            assert_json_matches_no_panic(&actual, expected, Config::new(CompareMode::Inclusive))
                .is_ok()
        }
        None => false,
    }
}
