use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use super::{DecodeRequest, DecodedImage, ImageSource, Resolution};

/// Identifies one image of one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageKey {
    pub specimen: usize,
    pub scan: usize,
    pub resolution: Resolution,
}

/// Independent cancellation domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Thumbnails of the buffered specimens.
    Prefetch,
    /// The slide level shown in the viewer.
    View,
}

impl Lane {
    pub fn of(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Thumbnail => Lane::Prefetch,
            Resolution::Slide => Lane::View,
        }
    }

    fn slot(self) -> usize {
        match self {
            Lane::Prefetch => 0,
            Lane::View => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub enum LoadEvent {
    Loaded {
        key: ImageKey,
        generation: u64,
        image: Arc<DecodedImage>,
    },
    Failed {
        key: ImageKey,
        generation: u64,
        error: String,
    },
    /// The request was superseded before or while it ran.
    Stale { key: ImageKey, generation: u64 },
}

impl LoadEvent {
    pub fn key(&self) -> ImageKey {
        match self {
            LoadEvent::Loaded { key, .. }
            | LoadEvent::Failed { key, .. }
            | LoadEvent::Stale { key, .. } => *key,
        }
    }
}

struct Job {
    key: ImageKey,
    generation: u64,
    request: DecodeRequest,
}

type Generations = Arc<[AtomicU64; 2]>;

/// Fixed pool of decode threads fed through a shared job channel.
pub struct ImageLoader {
    jobs: Sender<Job>,
    results: Receiver<LoadEvent>,
    generations: Generations,
}

impl ImageLoader {
    pub fn new(source: Arc<dyn ImageSource>, workers: usize) -> Self {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (result_tx, result_rx) = mpsc::channel::<LoadEvent>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let generations: Generations = Arc::new([AtomicU64::new(0), AtomicU64::new(0)]);

        for id in 0..workers.max(1) {
            let jobs = Arc::clone(&job_rx);
            let results = result_tx.clone();
            let source = Arc::clone(&source);
            let generations = Arc::clone(&generations);
            let spawned = thread::Builder::new()
                .name(format!("decode-{id}"))
                .spawn(move || worker(jobs, results, source, generations));
            if let Err(err) = spawned {
                log::error!("could not start decode worker {id}: {err}");
            }
        }

        Self {
            jobs: job_tx,
            results: result_rx,
            generations,
        }
    }

    pub fn generation(&self, lane: Lane) -> u64 {
        self.generations[lane.slot()].load(Ordering::Acquire)
    }

    /// Invalidate everything queued or running on `lane`.
    pub fn advance(&self, lane: Lane) -> u64 {
        self.generations[lane.slot()].fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Queue a decode under the lane's current generation, which is returned.
    pub fn request(&self, key: ImageKey, request: DecodeRequest) -> u64 {
        let generation = self.generation(Lane::of(key.resolution));
        let job = Job {
            key,
            generation,
            request,
        };
        if self.jobs.send(job).is_err() {
            log::error!("decode workers are gone; {key:?} will not load");
        }
        generation
    }

    /// Drain finished work. Results that lost the race against
    /// [`advance`](Self::advance) are reported as `Stale`.
    pub fn poll(&self) -> Vec<LoadEvent> {
        self.results
            .try_iter()
            .map(|event| self.recheck(event))
            .collect()
    }

    fn recheck(&self, event: LoadEvent) -> LoadEvent {
        match event {
            LoadEvent::Loaded { key, generation, .. } | LoadEvent::Failed { key, generation, .. }
                if generation != self.generation(Lane::of(key.resolution)) =>
            {
                LoadEvent::Stale { key, generation }
            }
            event => event,
        }
    }

    #[cfg(test)]
    fn wait(&self, timeout: std::time::Duration) -> Option<LoadEvent> {
        self.results
            .recv_timeout(timeout)
            .ok()
            .map(|event| self.recheck(event))
    }
}

fn worker(
    jobs: Arc<Mutex<Receiver<Job>>>,
    results: Sender<LoadEvent>,
    source: Arc<dyn ImageSource>,
    generations: Generations,
) {
    let current = |key: &ImageKey| generations[Lane::of(key.resolution).slot()].load(Ordering::Acquire);

    loop {
        let job = match jobs.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => return,
        };
        let Ok(Job {
            key,
            generation,
            request,
        }) = job
        else {
            return;
        };

        let event = if generation != current(&key) {
            LoadEvent::Stale { key, generation }
        } else {
            match source.decode(&request) {
                _ if generation != current(&key) => LoadEvent::Stale { key, generation },
                Ok(image) => LoadEvent::Loaded {
                    key,
                    generation,
                    image: Arc::new(image),
                },
                Err(err) => LoadEvent::Failed {
                    key,
                    generation,
                    error: err.to_string(),
                },
            }
        };
        if results.send(event).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::decode::FileDecoder;
    use crate::imaging::DecodeError;
    use std::path::PathBuf;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Produces a 1×1 image once the test hands out a token.
    struct GatedSource {
        tokens: Mutex<Receiver<()>>,
    }

    impl ImageSource for GatedSource {
        fn decode(&self, _request: &DecodeRequest) -> Result<DecodedImage, DecodeError> {
            if let Ok(tokens) = self.tokens.lock() {
                let _ = tokens.recv_timeout(TIMEOUT);
            }
            Ok(DecodedImage {
                width: 1,
                height: 1,
                rgb: vec![0, 0, 0],
                background: [0, 0, 0],
            })
        }
    }

    fn gated() -> (ImageLoader, Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let source = GatedSource {
            tokens: Mutex::new(rx),
        };
        (ImageLoader::new(Arc::new(source), 1), tx)
    }

    fn key(specimen: usize, resolution: Resolution) -> ImageKey {
        ImageKey {
            specimen,
            scan: 0,
            resolution,
        }
    }

    fn request(resolution: Resolution, path: &str) -> DecodeRequest {
        DecodeRequest {
            resolution,
            paths: vec![PathBuf::from(path)],
            max_dim: 64,
            max_pixels: 4096,
        }
    }

    #[test]
    fn current_requests_load() {
        let (loader, gate) = gated();
        let generation = loader.request(key(0, Resolution::Thumbnail), request(Resolution::Thumbnail, "a.png"));
        gate.send(()).expect("worker alive");

        match loader.wait(TIMEOUT) {
            Some(LoadEvent::Loaded { key: k, generation: g, image }) => {
                assert_eq!(k, key(0, Resolution::Thumbnail));
                assert_eq!(g, generation);
                assert_eq!(image.width, 1);
            }
            other => panic!("expected a loaded image, got {other:?}"),
        }
    }

    #[test]
    fn advancing_a_lane_turns_results_stale() {
        let (loader, gate) = gated();
        loader.request(key(0, Resolution::Slide), request(Resolution::Slide, "a.dcm"));
        loader.advance(Lane::View);
        gate.send(()).expect("worker alive");

        let event = loader.wait(TIMEOUT).expect("an event arrives");
        assert!(matches!(event, LoadEvent::Stale { .. }), "{event:?}");
        assert_eq!(event.key(), key(0, Resolution::Slide));
    }

    #[test]
    fn lanes_are_independent() {
        let (loader, gate) = gated();
        loader.request(key(1, Resolution::Thumbnail), request(Resolution::Thumbnail, "b.png"));
        loader.advance(Lane::View);
        gate.send(()).expect("worker alive");

        let event = loader.wait(TIMEOUT).expect("an event arrives");
        assert!(matches!(event, LoadEvent::Loaded { .. }), "{event:?}");
        assert_eq!(loader.generation(Lane::View), 1);
        assert_eq!(loader.generation(Lane::Prefetch), 0);
    }

    #[test]
    fn missing_file_fails_without_panicking() {
        let loader = ImageLoader::new(Arc::new(FileDecoder), 2);
        let missing = std::env::temp_dir().join("slide-selector-no-such-thumbnail.png");
        let req = DecodeRequest {
            paths: vec![missing],
            ..request(Resolution::Thumbnail, "")
        };
        loader.request(key(3, Resolution::Thumbnail), req);

        match loader.wait(TIMEOUT) {
            Some(LoadEvent::Failed { error, .. }) => assert!(error.contains("not found"), "{error}"),
            other => panic!("expected a failure, got {other:?}"),
        }
    }
}
