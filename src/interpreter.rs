// Embedded QuickJS instance, one per worker thread

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::payload::Payload;
use crate::resource::ResourceId;
use parking_lot::Mutex;
use rquickjs::{CatchResultExt, Context, Function, Persistent, Runtime, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-invocation deadline shared with the runtime's interrupt hook.
///
/// Armed before each message invocation and checked cooperatively by QuickJS
/// while script code runs. This is the hook that keeps a runaway script from
/// wedging its worker forever; scripts on other workers are unaffected either
/// way.
#[derive(Default)]
struct DeadlineCell {
    inner: Mutex<Option<Instant>>,
}

impl DeadlineCell {
    fn arm(&self, budget: Duration) {
        *self.inner.lock() = Some(Instant::now() + budget);
    }

    fn disarm(&self) {
        *self.inner.lock() = None;
    }

    fn expired(&self) -> bool {
        match *self.inner.lock() {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}

/// One embedded QuickJS virtual machine.
///
/// Owns all memory for the scripts loaded into it. Not safe for concurrent
/// use; accessed by exactly one thread (its owning worker) for its entire
/// lifetime, which is what makes the absence of internal locking sound.
pub(crate) struct Interpreter {
    // Field order matters: scripts hold context-owned values and must be
    // dropped before the context and runtime.
    scripts: HashMap<ResourceId, Persistent<Function<'static>>>,
    context: Context,
    _runtime: Runtime,
    deadline: Arc<DeadlineCell>,
    budget: Duration,
}

impl Interpreter {
    pub(crate) fn new(config: &PoolConfig) -> Result<Self, PoolError> {
        let runtime = Runtime::new()
            .map_err(|e| PoolError::Allocation(format!("quickjs runtime: {e}")))?;
        runtime.set_memory_limit(config.memory_limit);

        let deadline = Arc::new(DeadlineCell::default());
        let hook = Arc::clone(&deadline);
        runtime.set_interrupt_handler(Some(Box::new(move || hook.expired())));

        let context = Context::full(&runtime)
            .map_err(|e| PoolError::Allocation(format!("quickjs context: {e}")))?;

        Ok(Self {
            scripts: HashMap::new(),
            context,
            _runtime: runtime,
            deadline,
            budget: config.cpu_time_limit,
        })
    }

    /// Compile a script source into a message handler stored under `id`.
    ///
    /// The source is treated as a function body invoked once per message,
    /// with the message text bound to `message` - so `"return 1+1"` is a
    /// complete script. A failed compile stores nothing.
    pub(crate) fn compile(&mut self, id: ResourceId, source: &str) -> Result<(), PoolError> {
        let wrapped = format!("(function(message){{ {source}\n}})");
        let handler = self.context.with(|ctx| {
            ctx.eval::<Function, _>(wrapped)
                .catch(&ctx)
                .map(|f| Persistent::save(&ctx, f))
                .map_err(|e| PoolError::Compile(e.to_string()))
        })?;
        self.scripts.insert(id, handler);
        Ok(())
    }

    /// Invoke the stored handler for `id` with a message payload.
    ///
    /// Returns the handler's return value serialized as JSON text; an empty
    /// payload when the script returned nothing. Runs under the invocation
    /// deadline: an exceeded budget aborts the script with a runtime error
    /// and leaves the handler usable for the next message.
    pub(crate) fn invoke(&mut self, id: ResourceId, message: &Payload) -> Result<Payload, PoolError> {
        let handler = self.scripts.get(&id).ok_or(PoolError::ResourceGone)?;

        self.deadline.arm(self.budget);
        let result = self.context.with(|ctx| {
            let func = handler
                .clone()
                .restore(&ctx)
                .map_err(|e| PoolError::Runtime(e.to_string()))?;

            let text = message.to_text();
            let value = func
                .call::<_, Value>((text.as_ref(),))
                .catch(&ctx)
                .map_err(|e| PoolError::Runtime(e.to_string()))?;

            if value.is_undefined() {
                return Ok(Payload::default());
            }
            match ctx
                .json_stringify(value)
                .map_err(|e| PoolError::Runtime(e.to_string()))?
            {
                Some(json) => json
                    .to_string()
                    .map(Payload::from)
                    .map_err(|e| PoolError::Runtime(e.to_string())),
                None => Ok(Payload::default()),
            }
        });
        self.deadline.disarm();
        result
    }

    /// Release the compiled state for `id`. Returns whether anything was
    /// stored; tolerates resources that never finished loading.
    pub(crate) fn drop_script(&mut self, id: ResourceId) -> bool {
        self.scripts.remove(&id).is_some()
    }

    pub(crate) fn script_count(&self) -> usize {
        self.scripts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interpreter() -> Interpreter {
        Interpreter::new(&PoolConfig::default()).unwrap()
    }

    #[test]
    fn compile_and_invoke_returns_json_result() {
        let mut interp = interpreter();
        interp.compile(ResourceId(1), "return 1+1").unwrap();

        let reply = interp.invoke(ResourceId(1), &Payload::default()).unwrap();
        assert_eq!(reply.as_utf8().unwrap(), "2");
    }

    #[test]
    fn message_text_is_bound() {
        let mut interp = interpreter();
        interp
            .compile(ResourceId(1), "return message.length")
            .unwrap();

        let reply = interp.invoke(ResourceId(1), &Payload::from("hello")).unwrap();
        assert_eq!(reply.as_utf8().unwrap(), "5");
    }

    #[test]
    fn compile_failure_stores_nothing() {
        let mut interp = interpreter();
        let err = interp.compile(ResourceId(1), "syntax((").unwrap_err();
        assert!(matches!(err, PoolError::Compile(_)));
        assert_eq!(interp.script_count(), 0);
    }

    #[test]
    fn invoke_unknown_id_is_gone() {
        let mut interp = interpreter();
        let err = interp.invoke(ResourceId(9), &Payload::default()).unwrap_err();
        assert!(matches!(err, PoolError::ResourceGone));
    }

    #[test]
    fn script_throw_is_a_runtime_error_and_stays_usable() {
        let mut interp = interpreter();
        interp
            .compile(
                ResourceId(1),
                "if (message === 'boom') throw new Error('boom'); return 'ok'",
            )
            .unwrap();

        let err = interp.invoke(ResourceId(1), &Payload::from("boom")).unwrap_err();
        assert!(matches!(err, PoolError::Runtime(_)));

        let reply = interp.invoke(ResourceId(1), &Payload::from("fine")).unwrap();
        assert_eq!(reply.as_utf8().unwrap(), "\"ok\"");
    }

    #[test]
    fn no_return_value_yields_empty_payload() {
        let mut interp = interpreter();
        interp.compile(ResourceId(1), "var x = 1;").unwrap();

        let reply = interp.invoke(ResourceId(1), &Payload::default()).unwrap();
        assert!(reply.is_empty());
    }

    #[test]
    fn runaway_script_is_interrupted() {
        let config = PoolConfig {
            cpu_time_limit: Duration::from_millis(100),
            ..Default::default()
        };
        let mut interp = Interpreter::new(&config).unwrap();
        interp.compile(ResourceId(1), "while(true){}").unwrap();

        let start = Instant::now();
        let err = interp.invoke(ResourceId(1), &Payload::default()).unwrap_err();
        assert!(matches!(err, PoolError::Runtime(_)));
        assert!(start.elapsed() < Duration::from_secs(10));

        // The interpreter survives the interruption.
        interp.compile(ResourceId(2), "return 'alive'").unwrap();
        let reply = interp.invoke(ResourceId(2), &Payload::default()).unwrap();
        assert_eq!(reply.as_utf8().unwrap(), "\"alive\"");
    }

    #[test]
    fn drop_script_releases_state() {
        let mut interp = interpreter();
        interp.compile(ResourceId(1), "return 1").unwrap();
        assert_eq!(interp.script_count(), 1);

        assert!(interp.drop_script(ResourceId(1)));
        assert!(!interp.drop_script(ResourceId(1)));
        assert!(matches!(
            interp.invoke(ResourceId(1), &Payload::default()),
            Err(PoolError::ResourceGone)
        ));
    }
}
