//! Single-pass digest fan-out.
//!
//! A source stream is read exactly once; every chunk goes to the sink and
//! to one hash worker per requested algorithm. Workers run on scoped
//! threads fed through bounded channels, so the producer blocks when the
//! slowest consumer lags and nothing outlives the call.

use crate::digest::{DigestAlgorithm, DigestEngine, DigestMap};
use crate::errors::{BagError, BagResult};
use crossbeam_channel::bounded;
use std::io::{Read, Write};
use std::sync::Arc;
use std::thread;

const CHUNK_SIZE: usize = 64 * 1024;

/// Per-worker channel depth. Keeps memory bounded while letting the
/// producer run ahead of a briefly stalled hasher.
const CHANNEL_DEPTH: usize = 8;

/// Copies `reader` to `writer` while computing every requested digest in
/// the same pass. Returns the digests as lower-case hex.
///
/// The first source or sink error aborts the whole call; all workers are
/// joined before it returns, error paths included.
pub fn fanout<R, W>(
    reader: &mut R,
    writer: &mut W,
    algorithms: &[DigestAlgorithm],
) -> BagResult<DigestMap>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    if algorithms.is_empty() {
        return Err(BagError::Config(
            "digest fan-out requires at least one algorithm".into(),
        ));
    }

    thread::scope(|scope| {
        let mut senders = Vec::with_capacity(algorithms.len());
        let mut workers = Vec::with_capacity(algorithms.len());

        for &algorithm in algorithms {
            let (tx, rx) = bounded::<Arc<[u8]>>(CHANNEL_DEPTH);
            senders.push(tx);
            workers.push(scope.spawn(move || {
                let mut engine = DigestEngine::new(algorithm);
                while let Ok(chunk) = rx.recv() {
                    engine.update(&chunk);
                }
                (algorithm, engine.finalize_hex())
            }));
        }

        let mut buf = [0u8; CHUNK_SIZE];
        let copied: BagResult<()> = loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    break Err(BagError::Io {
                        context: "reading fan-out source".into(),
                        source: e,
                    })
                }
            };

            if let Err(e) = writer.write_all(&buf[..n]) {
                break Err(BagError::Io {
                    context: "writing fan-out sink".into(),
                    source: e,
                });
            }

            let chunk: Arc<[u8]> = Arc::from(&buf[..n]);
            let mut stalled = false;
            for tx in &senders {
                if tx.send(Arc::clone(&chunk)).is_err() {
                    stalled = true;
                }
            }
            if stalled {
                // A receiver only disappears when its worker died.
                break Err(BagError::Config("digest worker terminated early".into()));
            }
        };

        // Close the channels so every worker drains and finalizes.
        drop(senders);

        let mut digests = DigestMap::new();
        for worker in workers {
            let (algorithm, digest) = worker
                .join()
                .map_err(|_| BagError::Config("digest worker panicked".into()))?;
            digests.insert(algorithm, digest);
        }

        copied?;
        Ok(digests)
    })
}
