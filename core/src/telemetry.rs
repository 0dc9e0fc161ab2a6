use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Histogram, HistogramOpts, IntGauge, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Ingestion
    pub static ref EVENTS_INGESTED: CounterVec = CounterVec::new(
        Opts::new("events_ingested_total", "Chain events translated and published, by variant"),
        &["variant"]
    ).unwrap();
    pub static ref EVENTS_DROPPED_BUSY: Counter = Counter::new(
        "orchestrator_events_dropped_total",
        "Events dropped by the orchestrator single-flight gate"
    ).unwrap();

    // Policy / execution
    pub static ref POLICIES_TRIGGERED: CounterVec = CounterVec::new(
        Opts::new("policies_triggered_total", "Policy trigger firings, by trigger type"),
        &["trigger"]
    ).unwrap();
    pub static ref EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("executions_total", "Execution attempts, by terminal status"),
        &["status"]
    ).unwrap();
    pub static ref EXECUTION_RETRIES: Counter = Counter::new(
        "execution_send_retries_total",
        "Transaction sends retried after a transient RPC error"
    ).unwrap();
    pub static ref EXECUTION_LATENCY_MS: Histogram = Histogram::with_opts(
        HistogramOpts::new("execution_latency_ms", "Risk check to confirmation, milliseconds")
            .buckets(vec![50.0, 250.0, 1000.0, 3000.0, 8000.0, 20000.0])
    ).unwrap();

    // State engine
    pub static ref OPEN_POSITIONS: IntGauge = IntGauge::new(
        "open_positions", "Positions currently open"
    ).unwrap();
    pub static ref SNAPSHOTS_WRITTEN: Counter = Counter::new(
        "state_snapshots_written_total", "State snapshots flushed to the KV store"
    ).unwrap();

    // Swarm
    pub static ref AGENT_TICKS: CounterVec = CounterVec::new(
        Opts::new("agent_ticks_total", "Agent tick invocations, by role"),
        &["role"]
    ).unwrap();
    pub static ref AGENT_TICK_ERRORS: CounterVec = CounterVec::new(
        Opts::new("agent_tick_errors_total", "Agent ticks that raised, by role"),
        &["role"]
    ).unwrap();
    pub static ref SIGNALS_PUBLISHED: CounterVec = CounterVec::new(
        Opts::new("signals_published_total", "Signals appended to the cross-node bus, by channel"),
        &["channel"]
    ).unwrap();
    pub static ref SIGNALS_CONSUMED: CounterVec = CounterVec::new(
        Opts::new("signals_consumed_total", "Signals dispatched to handlers, by channel"),
        &["channel"]
    ).unwrap();
    pub static ref REASONING_CALLS: Counter = Counter::new(
        "reasoning_calls_total", "Requests sent to the reasoning service"
    ).unwrap();
    pub static ref REASONING_FAILURES: Counter = Counter::new(
        "reasoning_failures_total", "Reasoning calls that errored or returned unparseable output"
    ).unwrap();
}

/// Register every metric once; must run before the first scrape.
pub fn register_metrics() {
    let r = &REGISTRY;
    r.register(Box::new(EVENTS_INGESTED.clone())).ok();
    r.register(Box::new(EVENTS_DROPPED_BUSY.clone())).ok();
    r.register(Box::new(POLICIES_TRIGGERED.clone())).ok();
    r.register(Box::new(EXECUTIONS_TOTAL.clone())).ok();
    r.register(Box::new(EXECUTION_RETRIES.clone())).ok();
    r.register(Box::new(EXECUTION_LATENCY_MS.clone())).ok();
    r.register(Box::new(OPEN_POSITIONS.clone())).ok();
    r.register(Box::new(SNAPSHOTS_WRITTEN.clone())).ok();
    r.register(Box::new(AGENT_TICKS.clone())).ok();
    r.register(Box::new(AGENT_TICK_ERRORS.clone())).ok();
    r.register(Box::new(SIGNALS_PUBLISHED.clone())).ok();
    r.register(Box::new(SIGNALS_CONSUMED.clone())).ok();
    r.register(Box::new(REASONING_CALLS.clone())).ok();
    r.register(Box::new(REASONING_FAILURES.clone())).ok();
}
