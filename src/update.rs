//! Keeps the cached script bundle up to date with the remote source.
//!
//! The fetch runs on a background thread started at attach so the host's own startup path is
//! never blocked by network I/O. The injection pipeline is the only caller that waits for it,
//! via [`FetchHandle::wait`], and the request timeout bounds that wait. Whatever happens, the
//! previous cache survives: a failed fetch just means this launch runs the bundle that is
//! already on disk.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use eyre::{Result, WrapErr};
use once_cell::sync::OnceCell;

use crate::context::Context;
use crate::LOADER_NAME;

/// With a cached bundle on disk we would rather fall back to it than keep the user waiting.
const CACHED_TIMEOUT: Duration = Duration::from_secs(3);

/// On a first run there is nothing to fall back to, so the request gets much longer.
const FIRST_RUN_TIMEOUT: Duration = Duration::from_secs(10);

/// Terminal states of a fetch cycle.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FetchOutcome {
    /// A new bundle was downloaded and swapped into the cache.
    Updated,

    /// The server confirmed the cached bundle is current; the cache was left untouched.
    Fresh,

    /// Network or I/O trouble. The previous cache, if any, is intact.
    Failed,
}

/// Join handle for the in-flight fetch. `wait` blocks until the fetch settles and is safe to
/// call from any number of threads; the outcome is computed once and cached.
pub struct FetchHandle {
    thread: Mutex<Option<JoinHandle<FetchOutcome>>>,
    outcome: OnceCell<FetchOutcome>,
}

impl FetchHandle {
    fn new(thread: Option<JoinHandle<FetchOutcome>>) -> FetchHandle {
        FetchHandle {
            thread: Mutex::new(thread),
            outcome: OnceCell::new(),
        }
    }

    /// Blocks until the fetch reaches a terminal state. If the fetch thread never started,
    /// this settles immediately as `Failed` rather than waiting on nothing.
    pub fn wait(&self) -> FetchOutcome {
        *self.outcome.get_or_init(|| {
            let thread = self.thread.lock().unwrap().take();

            match thread {
                Some(thread) => thread.join().unwrap_or(FetchOutcome::Failed),
                None => FetchOutcome::Failed,
            }
        })
    }
}

/// Starts the bundle fetch in the background and returns a handle the pipeline can settle on.
pub fn start(ctx: &Arc<Context>) -> Arc<FetchHandle> {
    let ctx = Arc::clone(ctx);

    let thread = std::thread::Builder::new()
        .name("burrow-bundle-fetch".to_string())
        .spawn(move || match fetch_bundle(&ctx) {
            Ok(outcome) => outcome,
            Err(err) => {
                log::error!("bundle fetch failed: {err:?}");
                ctx.notify("Failed to fetch the script bundle; the loader may not start.");
                FetchOutcome::Failed
            }
        });

    let thread = match thread {
        Ok(thread) => Some(thread),
        Err(err) => {
            log::error!("could not spawn the bundle fetch thread: {err}");
            None
        }
    };

    Arc::new(FetchHandle::new(thread))
}

fn fetch_bundle(ctx: &Context) -> Result<FetchOutcome> {
    let bundle_path = ctx.bundle_path();
    let etag_path = ctx.etag_path();
    let have_cache = bundle_path.exists();

    let client = reqwest::blocking::Client::builder()
        .user_agent(LOADER_NAME)
        .timeout(if have_cache {
            CACHED_TIMEOUT
        } else {
            FIRST_RUN_TIMEOUT
        })
        .build()
        .wrap_err("failed to build the HTTP client")?;

    let url = ctx.config().bundle_url();
    log::info!("fetching script bundle from {url}");

    let mut request = client.get(url);

    // The stored etag is only meaningful while the bundle it describes is still on disk.
    if have_cache {
        if let Ok(etag) = fs::read_to_string(&etag_path) {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag.trim());
        }
    }

    let response = request.send().wrap_err("bundle request failed")?;

    if response.status() == reqwest::StatusCode::NOT_MODIFIED {
        log::info!("cached bundle is still current");
        return Ok(FetchOutcome::Fresh);
    }

    if !response.status().is_success() {
        eyre::bail!("server responded with status {}", response.status());
    }

    let etag = response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let body = response.bytes().wrap_err("failed to read the bundle body")?;

    write_cache_pair(&bundle_path, &etag_path, &body, etag.as_deref())
        .wrap_err("failed to write the bundle cache")?;

    log::info!("bundle updated ({} bytes)", body.len());
    Ok(FetchOutcome::Updated)
}

/// Swaps a new bundle and its etag into the cache.
///
/// Both files are written to temporaries and renamed into place, and the old etag is removed
/// before the bundle swap: a torn sequence can leave a bundle without an etag (the next fetch
/// is merely unconditional) but never an etag describing a bundle that isn't there.
fn write_cache_pair(
    bundle_path: &Path,
    etag_path: &Path,
    body: &[u8],
    etag: Option<&str>,
) -> Result<()> {
    let bundle_tmp = bundle_path.with_extension("js.tmp");
    fs::write(&bundle_tmp, body)?;

    if etag_path.exists() {
        fs::remove_file(etag_path)?;
    }

    fs::rename(&bundle_tmp, bundle_path)?;

    if let Some(etag) = etag {
        let etag_tmp = etag_path.with_extension("txt.tmp");
        fs::write(&etag_tmp, etag)?;
        fs::rename(&etag_tmp, etag_path)?;
    }

    Ok(())
}
