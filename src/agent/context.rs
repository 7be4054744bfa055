use crate::db::schema::SchemaDescription;
use serde::Serialize;
use std::ops::{Deref, DerefMut};

/// Databases and tables constraining the next question. Empty lists mean
/// "decide automatically".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseContext {
    pub databases: Vec<String>,
    pub tables: Vec<String>,
}

/// Mutable state owned by one agent instance.
#[derive(Debug, Clone)]
pub struct Session {
    pub context: DatabaseContext,
    pub schema: SchemaDescription,
    /// Set on the first quota signal; only an explicit reset clears it.
    pub rate_limited: bool,
}

impl Session {
    pub fn new(schema: SchemaDescription) -> Self {
        Self {
            context: DatabaseContext::default(),
            schema,
            rate_limited: false,
        }
    }
}

/// Session access for the span of one question.
///
/// Context and schema snapshot are captured on entry and put back when the
/// guard drops, on every exit path including unwinding. The rate-limit flag
/// is not part of the snapshot.
pub struct ScopedContext<'a> {
    session: &'a mut Session,
    saved: Option<(DatabaseContext, SchemaDescription)>,
}

impl<'a> ScopedContext<'a> {
    pub fn enter(session: &'a mut Session) -> Self {
        let saved = Some((session.context.clone(), session.schema.clone()));
        Self { session, saved }
    }
}

impl Deref for ScopedContext<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session
    }
}

impl DerefMut for ScopedContext<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session
    }
}

impl Drop for ScopedContext<'_> {
    fn drop(&mut self) {
        if let Some((context, schema)) = self.saved.take() {
            self.session.context = context;
            self.session.schema = schema;
        }
    }
}
