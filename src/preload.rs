//! Background warm-up of the next song's stream.
//!
//! While one track plays, the stream handle of the song after it is acquired
//! ahead of time, so the next advance does not wait on a backend. The
//! channel lock is only held to read and write the queue, never across the
//! backend call. Anything that goes wrong is logged and forgotten: the
//! advance then simply acquires the stream itself.

use std::sync::Arc;

use crate::{player::Channel, resolver::Resolver};

/// Preloads the next song of `channel`.
pub(crate) async fn preload(resolver: Arc<Resolver>, channel: Arc<Channel>) {
    let generation = channel.generation();
    let mut track = {
        let state = channel.state.lock().await;
        if state.released {
            return;
        }
        match state.queue.next() {
            Some(next) if !next.is_preloaded() => next.clone(),
            _ => return,
        }
    };

    let handle = match resolver.acquire(&mut track).await {
        Ok(handle) => handle,
        Err(e) => {
            debug!("{}: could not preload {track}: {e}", channel.id);
            return;
        }
    };
    track.preload(handle);

    let mut state = channel.state.lock().await;
    if state.released || channel.generation() != generation {
        trace!("{}: preload of {track} outlived its channel", channel.id);
        return;
    }

    let preloaded = track.to_string();
    if state.queue.replace_next(track) {
        debug!("{}: preloaded {preloaded}", channel.id);
    } else {
        trace!("{}: queue moved on before preloading {preloaded}", channel.id);
    }
}
