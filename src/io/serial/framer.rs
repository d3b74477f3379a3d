// src/io/serial/framer.rs
//
// Sentinel/terminator framing for the wind sensor's ASCII stream.
// Reassembles `$<speed>,<direction>\r\n` packets from arbitrarily chunked reads
// and resynchronizes when the stream is corrupted.

// =============================================================================
// Constants
// =============================================================================

/// Character that opens every packet
pub const SENTINEL: u8 = b'$';

/// Two-byte sequence that closes every packet
pub const TERMINATOR: &[u8] = b"\r\n";

/// Buffered length at which the framer stops waiting and starts discarding
pub const RESYNC_THRESHOLD: usize = 15;

// =============================================================================
// Types
// =============================================================================

/// A complete packet extracted from the serial stream, sentinel through
/// terminator inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Raw frame bytes including sentinel and terminator
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Text strictly between the sentinel and the terminator.
    /// Non-UTF-8 bytes are replaced so the parser can reject them.
    pub fn payload(&self) -> String {
        let end = self.bytes.len() - TERMINATOR.len();
        String::from_utf8_lossy(&self.bytes[1..end]).into_owned()
    }
}

/// Outcome of feeding bytes into the framer, in stream order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramerEvent {
    /// A complete frame was extracted and consumed from the buffer
    Frame(Frame),
    /// Bytes were discarded to regain frame alignment
    Corrupted {
        /// The discarded bytes
        discarded: Vec<u8>,
    },
}

// =============================================================================
// Framer
// =============================================================================

/// Stateful framer for the wind sensor stream.
///
/// The buffer is a byte arena with a read cursor: consumed prefixes advance
/// `head` and the arena is compacted once the dead prefix dominates it.
#[derive(Debug, Default)]
pub struct SerialFramer {
    buffer: Vec<u8>,
    head: usize,
}

impl SerialFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered bytes not yet framed or discarded
    pub fn len(&self) -> usize {
        self.buffer.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffered bytes not yet framed or discarded
    pub fn pending(&self) -> &[u8] {
        &self.buffer[self.head..]
    }

    /// Feed raw bytes into the framer.
    /// Returns the frames and corruption events produced, in stream order.
    pub fn ingest(&mut self, data: &[u8]) -> Vec<FramerEvent> {
        let mut events = Vec::new();
        self.buffer.extend_from_slice(data);

        self.extract_frames(&mut events);

        if self.len() >= RESYNC_THRESHOLD {
            self.resync(&mut events);
        }

        self.compact();
        events
    }

    /// Drop everything buffered. Used when the port is closed.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.head = 0;
    }

    fn extract_frames(&mut self, events: &mut Vec<FramerEvent>) {
        loop {
            let pending = self.pending();
            let Some(start) = pending.iter().position(|&b| b == SENTINEL) else {
                return;
            };
            if find_terminator(pending, 0).is_none() {
                return;
            }

            match find_terminator(pending, start) {
                Some(end) => {
                    let frame_end = end + TERMINATOR.len();
                    let bytes = pending[start..frame_end].to_vec();
                    self.advance(frame_end);
                    events.push(FramerEvent::Frame(Frame { bytes }));
                }
                None => {
                    // Terminator only ahead of the sentinel: dangling tail of a
                    // packet whose start was lost. Keep the candidate and wait.
                    events.push(FramerEvent::Corrupted {
                        discarded: self.advance(start),
                    });
                    return;
                }
            }
        }
    }

    fn resync(&mut self, events: &mut Vec<FramerEvent>) {
        let sentinels = self.sentinel_count();

        if sentinels == 0 {
            let discarded = self.advance(self.len());
            events.push(FramerEvent::Corrupted { discarded });
            return;
        }

        let mut sentinels = sentinels;
        while sentinels > 1 {
            // At least two sentinels remain, so one exists past position 0
            let Some(next) = self.pending()[1..].iter().position(|&b| b == SENTINEL) else {
                break;
            };
            let discarded = self.advance(next + 1);
            if discarded.contains(&SENTINEL) {
                sentinels -= 1;
            }
            events.push(FramerEvent::Corrupted { discarded });
        }
    }

    fn sentinel_count(&self) -> usize {
        self.pending().iter().filter(|&&b| b == SENTINEL).count()
    }

    /// Remove `count` bytes from the front of the buffer, returning them
    fn advance(&mut self, count: usize) -> Vec<u8> {
        let removed = self.buffer[self.head..self.head + count].to_vec();
        self.head += count;
        removed
    }

    fn compact(&mut self) {
        if self.head == self.buffer.len() {
            self.buffer.clear();
            self.head = 0;
        } else if self.head > self.buffer.len() / 2 {
            self.buffer.drain(..self.head);
            self.head = 0;
        }
    }
}

/// Index of the first terminator at or after `from`
fn find_terminator(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(TERMINATOR.len())
        .position(|w| w == TERMINATOR)
        .map(|i| i + from)
}
