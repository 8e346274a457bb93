/// Spawns a detached task on a [`TaskPool`](crate::TaskPool) with optional
/// tracing instrumentation.
///
/// With the `instrument` feature enabled, each task gets its own span that
/// follows from the span of the code that launched it.
///
/// # Syntax
///
/// ```text
/// // Simple case (no fields):
/// spawn!(pool, "task_name", async { ... })
///
/// // With span fields (use parentheses):
/// spawn!(pool, "task_name", (?field1, field2 = value), async { ... })
/// ```
macro_rules! spawn {
    // Simple case: just task name and future (no fields)
    ($pool:expr, $name:literal, async $($rest:tt)*) => {{
        let task = async $($rest)*;
        #[cfg(feature = "instrument")]
        let task = {
            let span = tracing::trace_span!(parent: None, $name);
            span.follows_from(tracing::Span::current());
            tracing::Instrument::instrument(task, span)
        };
        $pool.spawn(task)
    }};

    // Fields are wrapped in parentheses for clear delimitation
    ($pool:expr, $name:literal, ($($field:tt)*), async $($rest:tt)*) => {{
        let task = async $($rest)*;
        #[cfg(feature = "instrument")]
        let task = {
            let span = tracing::trace_span!(parent: None, $name, $($field)*);
            span.follows_from(tracing::Span::current());
            tracing::Instrument::instrument(task, span)
        };
        $pool.spawn(task)
    }};
}

pub(crate) use spawn;
