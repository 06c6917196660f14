use std::collections::HashMap;

/// What a scope reference points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeRef {
    pub kind: String,
    pub object_id: String,
    pub frame_index: usize,
}

/// Variables references handed to the client while the program is paused.
///
/// References are positive, never reused within a session, and only valid
/// until the next resume. DAP clients commonly parse `variablesReference` as
/// an `i32`, so the counter wraps back to 1 before leaving that range.
#[derive(Debug)]
pub struct VariableStore {
    next: i64,
    scopes: HashMap<i64, ScopeRef>,
    objects: HashMap<i64, String>,
}

impl Default for VariableStore {
    fn default() -> Self {
        Self {
            next: 1,
            scopes: HashMap::new(),
            objects: HashMap::new(),
        }
    }
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> i64 {
        let reference = self.next;
        self.next = if self.next >= i64::from(i32::MAX) {
            1
        } else {
            self.next + 1
        };
        reference
    }

    pub fn add_scope(&mut self, scope: ScopeRef) -> i64 {
        let reference = self.allocate();
        self.scopes.insert(reference, scope);
        reference
    }

    pub fn add_object(&mut self, object_id: impl Into<String>) -> i64 {
        let reference = self.allocate();
        self.objects.insert(reference, object_id.into());
        reference
    }

    pub fn scope(&self, reference: i64) -> Option<&ScopeRef> {
        self.scopes.get(&reference)
    }

    /// The remote object behind a scope or object reference.
    pub fn object_id(&self, reference: i64) -> Option<&str> {
        self.scopes
            .get(&reference)
            .map(|scope| scope.object_id.as_str())
            .or_else(|| self.objects.get(&reference).map(String::as_str))
    }

    /// Forget every reference; the counter keeps counting.
    pub fn clear(&mut self) {
        self.scopes.clear();
        self.objects.clear();
    }

    pub fn len(&self) -> usize {
        self.scopes.len() + self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
