//! In-memory instrument factory and log capture for tests.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use opentelemetry::KeyValue;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use crate::instruments::{CounterInstrument, HistogramInstrument, InstrumentFactory};

type Attributes = Vec<(String, String)>;

struct Measurement {
    name: &'static str,
    value: u64,
    attributes: Attributes,
}

#[derive(Default)]
struct State {
    created: HashMap<&'static str, usize>,
    measurements: Vec<Measurement>,
}

#[derive(Default)]
pub struct RecordingFactory {
    state: Arc<Mutex<State>>,
}

struct RecordingInstrument {
    name: &'static str,
    state: Arc<Mutex<State>>,
}

impl RecordingInstrument {
    fn push(&self, value: u64, attributes: &[KeyValue]) {
        let attributes = attributes
            .iter()
            .map(|kv| (kv.key.as_str().to_string(), kv.value.to_string()))
            .collect();
        self.state.lock().unwrap().measurements.push(Measurement {
            name: self.name,
            value,
            attributes,
        });
    }
}

impl CounterInstrument for RecordingInstrument {
    fn add(&self, value: u64, attributes: &[KeyValue]) {
        self.push(value, attributes);
    }
}

impl HistogramInstrument for RecordingInstrument {
    fn record(&self, value: u64, attributes: &[KeyValue]) {
        self.push(value, attributes);
    }
}

impl RecordingFactory {
    fn instrument(&self, name: &'static str) -> RecordingInstrument {
        *self.state.lock().unwrap().created.entry(name).or_default() += 1;
        RecordingInstrument {
            name,
            state: self.state.clone(),
        }
    }

    /// How many instruments named `name` were created.
    pub fn created(&self, name: &str) -> usize {
        self.state.lock().unwrap().created.get(name).copied().unwrap_or(0)
    }

    /// Sum of values recorded on `name` with `host=<host>`.
    pub fn count(&self, name: &str, host: &str) -> u64 {
        self.observations(name, host).iter().sum()
    }

    /// Values recorded on `name` with `host=<host>`, in order.
    pub fn observations(&self, name: &str, host: &str) -> Vec<u64> {
        let host = ("host".to_string(), host.to_string());
        self.state
            .lock()
            .unwrap()
            .measurements
            .iter()
            .filter(|m| m.name == name && m.attributes.contains(&host))
            .map(|m| m.value)
            .collect()
    }

    /// Sum of all values recorded on `name`.
    pub fn total(&self, name: &str) -> u64 {
        self.state
            .lock()
            .unwrap()
            .measurements
            .iter()
            .filter(|m| m.name == name)
            .map(|m| m.value)
            .sum()
    }

    pub fn attributes(&self, name: &str) -> Vec<Attributes> {
        self.state
            .lock()
            .unwrap()
            .measurements
            .iter()
            .filter(|m| m.name == name)
            .map(|m| m.attributes.clone())
            .collect()
    }
}

impl InstrumentFactory for RecordingFactory {
    fn counter(
        &self,
        name: &'static str,
        _description: &'static str,
        _unit: &'static str,
    ) -> Box<dyn CounterInstrument> {
        Box::new(self.instrument(name))
    }

    fn histogram(
        &self,
        name: &'static str,
        _description: &'static str,
        _unit: &'static str,
    ) -> Box<dyn HistogramInstrument> {
        Box::new(self.instrument(name))
    }
}

/// One `tracing` event with its fields rendered to strings.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub fields: BTreeMap<String, String>,
}

impl CapturedEvent {
    pub fn message(&self) -> &str {
        self.field("message").unwrap_or_default()
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

struct FieldVisitor<'a>(&'a mut BTreeMap<String, String>);

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}

/// Layer that keeps every event seen on the current thread.
#[derive(Clone, Default)]
pub struct EventCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl EventCapture {
    /// Route this thread's events here until the guard drops. Current-thread
    /// runtimes keep spawned tasks on the same thread, so they are captured too.
    pub fn install(&self) -> DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn at_level(&self, level: Level) -> Vec<CapturedEvent> {
        self.events().into_iter().filter(|e| e.level == level).collect()
    }

    pub fn with_message(&self, message: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.message() == message)
            .collect()
    }
}

impl<S: Subscriber> Layer<S> for EventCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = BTreeMap::new();
        event.record(&mut FieldVisitor(&mut fields));
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            fields,
        });
    }
}
