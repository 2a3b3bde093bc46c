use crate::delivery::protocol::ServerFrame;
use crate::error::DeliveryError;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Ordered chunk storage for one job. Sequence numbers are 1-based
/// positions; nothing is ever dropped here, this is the buffer the
/// final artifact is assembled from.
#[derive(Default)]
pub struct ChunkBuffer {
    chunks: RwLock<Vec<String>>,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, content: String) -> u64 {
        let mut chunks = self.chunks.write();
        chunks.push(content);
        chunks.len() as u64
    }

    pub fn get(&self, seq: u64) -> Option<String> {
        if seq == 0 {
            return None;
        }
        self.chunks.read().get(seq as usize - 1).cloned()
    }

    pub fn len(&self) -> u64 {
        self.chunks.read().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.read().is_empty()
    }

    pub fn assembled(&self) -> String {
        self.chunks.read().concat()
    }

    /// Content up to a chunk position; used for degraded persistence
    /// of the last complete artifact.
    pub fn assembled_upto(&self, count: u64) -> String {
        self.chunks.read()[..count as usize].concat()
    }
}

struct LiveSession {
    session_id: String,
    tx: mpsc::Sender<ServerFrame>,
}

struct JobStream {
    buffer: Arc<ChunkBuffer>,
    session: Option<LiveSession>,
    /// Shared with feeds so the terminal outcome survives a full or
    /// closed live channel.
    terminal: Arc<parking_lot::Mutex<Option<ServerFrame>>>,
}

/// Multiplexes job output to at most one live session per job, with
/// resume-by-sequence replay out of the job buffer. Live delivery is
/// a bounded channel; overflow drops live frames only and the feed
/// backfills the gap from the buffer.
pub struct DeliveryHub {
    streams: DashMap<String, JobStream>,
    live_window: usize,
}

impl DeliveryHub {
    pub fn new(live_window: usize) -> Self {
        Self {
            streams: DashMap::new(),
            live_window: live_window.max(1),
        }
    }

    pub fn register(&self, job_id: &str, buffer: Arc<ChunkBuffer>) {
        self.streams.insert(
            job_id.to_string(),
            JobStream {
                buffer,
                session: None,
                terminal: Arc::new(parking_lot::Mutex::new(None)),
            },
        );
    }

    /// Binds a session to a job from `last_seq + 1`. A newer session
    /// always wins: the previous one (a dead socket, usually) is cut
    /// off and its feed ends.
    pub fn attach(
        &self,
        session_id: &str,
        job_id: &str,
        last_seq: u64,
    ) -> Result<DeliveryFeed, DeliveryError> {
        let mut entry = self
            .streams
            .get_mut(job_id)
            .ok_or(DeliveryError::SessionLost)?;

        let (tx, rx) = mpsc::channel(self.live_window);
        if let Some(old) = entry.session.replace(LiveSession {
            session_id: session_id.to_string(),
            tx,
        }) {
            tracing::debug!(
                "Session {} displaced by {} on job {}",
                old.session_id,
                session_id,
                job_id
            );
        }
        Ok(DeliveryFeed {
            buffer: entry.buffer.clone(),
            rx,
            next_seq: last_seq + 1,
            terminal: entry.terminal.clone(),
            done: false,
        })
    }

    /// Appends to the persistence buffer and forwards to the live
    /// session if one is attached. Never blocks the producer.
    pub fn push(&self, job_id: &str, content: String) -> u64 {
        let Some(mut entry) = self.streams.get_mut(job_id) else {
            return 0;
        };
        let seq = entry.buffer.push(content.clone());
        let mut drop_session = false;
        if let Some(session) = &entry.session {
            match session.tx.try_send(ServerFrame::Chunk { seq, content }) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Slow viewer: live frame dropped, resume replay
                    // covers it from the buffer.
                    tracing::debug!("Live window full on job {}, dropping frame {}", job_id, seq);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    drop_session = true;
                }
            }
        }
        if drop_session {
            entry.session = None;
        }
        seq
    }

    /// Records the job's terminal frame and forwards it. The shared
    /// slot is what feeds fall back to, so a full live channel cannot
    /// lose the outcome; the record stays for late attaches until it
    /// is purged.
    pub fn finish(&self, job_id: &str, frame: ServerFrame) {
        let Some(entry) = self.streams.get_mut(job_id) else {
            return;
        };
        *entry.terminal.lock() = Some(frame.clone());
        if let Some(session) = &entry.session {
            let _ = session.tx.try_send(frame);
        }
    }

    pub fn detach(&self, job_id: &str, session_id: &str) {
        if let Some(mut entry) = self.streams.get_mut(job_id) {
            if entry
                .session
                .as_ref()
                .is_some_and(|s| s.session_id == session_id)
            {
                entry.session = None;
            }
        }
    }

    pub fn has_session(&self, job_id: &str) -> bool {
        self.streams
            .get(job_id)
            .is_some_and(|entry| entry.session.is_some())
    }

    pub fn terminal(&self, job_id: &str) -> Option<ServerFrame> {
        self.streams
            .get(job_id)
            .and_then(|e| e.terminal.lock().clone())
    }

    pub fn remove(&self, job_id: &str) {
        self.streams.remove(job_id);
    }
}

/// Consumer half of an attached session. Serves buffered chunks first
/// (replay), then live frames, deduplicating by sequence number so a
/// resume never gaps or repeats.
pub struct DeliveryFeed {
    buffer: Arc<ChunkBuffer>,
    rx: mpsc::Receiver<ServerFrame>,
    next_seq: u64,
    terminal: Arc<parking_lot::Mutex<Option<ServerFrame>>>,
    done: bool,
}

impl DeliveryFeed {
    pub async fn next(&mut self) -> Option<ServerFrame> {
        loop {
            if self.done {
                return None;
            }
            if let Some(content) = self.buffer.get(self.next_seq) {
                let frame = ServerFrame::Chunk {
                    seq: self.next_seq,
                    content,
                };
                self.next_seq += 1;
                return Some(frame);
            }
            // The terminal frame is recorded only after the last push,
            // so an exhausted buffer plus a set slot means everything
            // was delivered.
            let terminal = self.terminal.lock().clone();
            if let Some(frame) = terminal {
                self.done = true;
                return Some(frame);
            }
            match self.rx.recv().await {
                Some(ServerFrame::Chunk { seq, content }) => {
                    if seq == self.next_seq {
                        self.next_seq += 1;
                        return Some(ServerFrame::Chunk { seq, content });
                    }
                    // Behind: already replayed. Ahead: the buffer has
                    // it, loop back and serve in order.
                    continue;
                }
                // Terminal frames are picked up from the shared slot
                // on the next loop turn.
                Some(_) => continue,
                None => {
                    // Displaced by a newer session or the job record
                    // was purged.
                    self.done = true;
                    return None;
                }
            }
        }
    }
}
