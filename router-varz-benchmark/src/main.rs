use getopts::Options;
use hdrhistogram::Histogram as HdrHistogram;
use log::{error, info};
use portable_atomic::AtomicU64;
use quanta::{Clock, Instant as QuantaInstant};
use router_varz::{StaticRegistry, TopAppsEntry, Varz, VarzBuilder};
use std::{
    env,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

const LOOP_SAMPLE: u64 = 1000;

const COMPONENTS: [&str; 4] = ["cloud_controller", "uaa", "dea", "health_manager"];
const FRAMEWORKS: [&str; 3] = ["rails3", "sinatra", "node"];
const RUNTIMES: [&str; 3] = ["ruby19", "ruby18", "node06"];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Mode {
    /// Backends carry no tags: only the untagged metric is touched.
    Untagged,
    /// Backends carry all three tags, spread over a handful of values.
    Tagged,
}

type SharedVarz = Arc<Varz<Arc<StaticRegistry>>>;

struct Generator {
    id: usize,
    t0: Option<QuantaInstant>,
    hist: HdrHistogram<u64>,
    done: Arc<AtomicBool>,
    rate_counter: Arc<AtomicU64>,
    varz: SharedVarz,
}

impl Generator {
    fn new(
        id: usize,
        varz: SharedVarz,
        done: Arc<AtomicBool>,
        rate_counter: Arc<AtomicU64>,
    ) -> Result<Generator, hdrhistogram::CreationError> {
        Ok(Generator {
            id,
            t0: None,
            hist: HdrHistogram::<u64>::new_with_bounds(1, u64::MAX, 3)?,
            done,
            rate_counter,
            varz,
        })
    }

    fn run(&mut self, mode: Mode) {
        let clock = Clock::new();
        let mut loop_counter = 0u64;

        let tagged = [
            ("component", COMPONENTS[self.id % COMPONENTS.len()]),
            ("framework", FRAMEWORKS[self.id % FRAMEWORKS.len()]),
            ("runtime", RUNTIMES[self.id % RUNTIMES.len()]),
        ];
        let backend: &[(&str, &str)] = match mode {
            Mode::Untagged => &[],
            Mode::Tagged => &tagged,
        };

        loop {
            loop_counter += 1;

            let t1 = clock.recent();

            if let Some(t0) = self.t0 {
                let start = if loop_counter % LOOP_SAMPLE == 0 { Some(clock.now()) } else { None };

                let status = if loop_counter % 100 == 0 { Some(503) } else { Some(200) };
                self.varz.capture_backend_request(backend);
                self.varz.capture_backend_response(backend, status, t1 - t0);

                if let Some(val) = start {
                    let delta = clock.now() - val;
                    self.hist.saturating_record(delta.as_nanos() as u64);

                    // Each loop iteration captures a request and a response.
                    self.rate_counter.fetch_add(LOOP_SAMPLE * 2, Ordering::AcqRel);

                    if self.done.load(Ordering::Relaxed) {
                        break;
                    }
                }
            }

            self.t0 = Some(t1);
        }
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        info!(
            "    sender latency: min: {:8} p50: {:8} p95: {:8} p99: {:8} p999: {:8} max: {:8}",
            nanos_to_readable(self.hist.min()),
            nanos_to_readable(self.hist.value_at_percentile(50.0)),
            nanos_to_readable(self.hist.value_at_percentile(95.0)),
            nanos_to_readable(self.hist.value_at_percentile(99.0)),
            nanos_to_readable(self.hist.value_at_percentile(99.9)),
            nanos_to_readable(self.hist.max())
        );
    }
}

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

pub fn opts() -> Options {
    let mut opts = Options::new();

    opts.optopt("d", "duration", "number of seconds to run the benchmark", "INTEGER");
    opts.optopt(
        "m",
        "mode",
        "whether backends are tagged or untagged (only the aggregate metric is updated)",
        "STRING",
    );
    opts.optopt("p", "producers", "number of producers", "INTEGER");
    opts.optflag("h", "help", "print this help menu");

    opts
}

fn parse_opt<T: std::str::FromStr>(
    matches: &getopts::Matches,
    name: &str,
    default: T,
) -> Option<T> {
    match matches.opt_str(name) {
        None => Some(default),
        Some(raw) => match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                error!("Invalid value for --{}: {}", name, raw);
                None
            }
        },
    }
}

fn main() {
    pretty_env_logger::init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("router-varz-benchmark");
    let opts = opts();

    let matches = match opts.parse(args.iter().skip(1)) {
        Ok(m) => m,
        Err(f) => {
            error!("Failed to parse command line args: {}", f);
            return;
        }
    };

    if matches.opt_present("help") {
        print_usage(program, &opts);
        return;
    }

    info!("varz benchmark");

    let (Some(seconds), Some(producers)) =
        (parse_opt(&matches, "duration", 60u64), parse_opt(&matches, "producers", 1usize))
    else {
        return;
    };
    let mode = match matches.opt_str("mode") {
        Some(s) if s.eq_ignore_ascii_case("tagged") => Mode::Tagged,
        _ => Mode::Untagged,
    };

    info!("duration: {}s", seconds);
    info!("producers: {}", producers);
    info!("mode: {:?}", mode);

    let registry = Arc::new(StaticRegistry::new());
    registry.set_uris(producers);
    registry.set_backends(producers);
    registry.set_top_apps(
        COMPONENTS.iter().enumerate().map(|(i, c)| TopAppsEntry::new(*c, i as u64 * 60)).collect(),
    );

    let varz = match VarzBuilder::new().build(Arc::clone(&registry)) {
        Ok(varz) => Arc::new(varz),
        Err(e) => {
            error!("Failed to build varz: {}", e);
            return;
        }
    };

    info!("varz configured");

    // Spin up our sample producers.
    let done = Arc::new(AtomicBool::new(false));
    let rate_counter = Arc::new(AtomicU64::new(0));
    let mut handles = Vec::new();

    for id in 0..producers {
        let generator = Generator::new(id, Arc::clone(&varz), done.clone(), rate_counter.clone());
        let mut generator = match generator {
            Ok(generator) => generator,
            Err(e) => {
                error!("Failed to create latency histogram: {}", e);
                return;
            }
        };
        let handle = thread::spawn(move || generator.run(mode));

        handles.push(handle);
    }

    thread::spawn(|| loop {
        thread::sleep(Duration::from_millis(10));
        quanta::set_recent(quanta::Instant::now());
    });

    // Render the document once per second, and figure out the sample rate.
    let mut total = 0;
    let mut t0 = Instant::now();

    let mut render_hist = match HdrHistogram::<u64>::new_with_bounds(1, u64::MAX, 3) {
        Ok(hist) => hist,
        Err(e) => {
            error!("Failed to create render histogram: {}", e);
            return;
        }
    };
    for _ in 0..seconds {
        let t1 = Instant::now();

        let start = Instant::now();
        if let Err(e) = varz.render() {
            error!("Failed to render varz document: {}", e);
        }
        let end = Instant::now();
        render_hist.saturating_record(duration_as_nanos(end - start) as u64);

        let turn_total = rate_counter.load(Ordering::Acquire);
        let turn_delta = turn_total - total;
        total = turn_total;
        let rate = turn_delta as f64 / (duration_as_nanos(t1 - t0) / 1_000_000_000.0);

        info!("capture rate: {:.0} captures/sec", rate);
        t0 = t1;
        thread::sleep(Duration::new(1, 0));
    }

    let snapshot = varz.snapshot();
    info!("--------------------------------------------------------------------------------");
    info!(" captured total: {}", total);
    info!(" requests in document: {}", snapshot.all.requests);
    info!(" tagged components: {}", snapshot.tags.component.len());
    info!(
        "   document render: min: {:8} p50: {:8} p95: {:8} p99: {:8} p999: {:8} max: {:8}",
        nanos_to_readable(render_hist.min()),
        nanos_to_readable(render_hist.value_at_percentile(50.0)),
        nanos_to_readable(render_hist.value_at_percentile(95.0)),
        nanos_to_readable(render_hist.value_at_percentile(99.0)),
        nanos_to_readable(render_hist.value_at_percentile(99.9)),
        nanos_to_readable(render_hist.max())
    );

    // Wait for the producers to finish so we can get their stats too.
    done.store(true, Ordering::SeqCst);
    for handle in handles {
        let _ = handle.join();
    }
}

fn duration_as_nanos(d: Duration) -> f64 {
    (d.as_secs() as f64 * 1e9) + d.subsec_nanos() as f64
}

fn nanos_to_readable(t: u64) -> String {
    let f = t as f64;
    if f < 1_000.0 {
        format!("{}ns", f)
    } else if f < 1_000_000.0 {
        format!("{:.0}μs", f / 1_000.0)
    } else if f < 2_000_000_000.0 {
        format!("{:.2}ms", f / 1_000_000.0)
    } else {
        format!("{:.3}s", f / 1_000_000_000.0)
    }
}
