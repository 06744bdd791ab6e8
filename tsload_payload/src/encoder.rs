//! Frame rows into a bounded, reusable arena.
//!
//! Every row is framed as CRLF terminated ASCII lines:
//!
//! ```text
//! +<series>\r\n
//! +<timestamp>\r\n
//! *<value count>\r\n
//! +<value>\r\n        (once per value)
//! ```
//!
//! The series line is never copied: it is emitted as three [`Span`]s pointing
//! at static literals and at the generator's series name. Everything else is
//! formatted into the arena and emitted as a single span per row. Rows are
//! accumulated between calls to [`FrameEncoder::reset`] until one fails to
//! fit. That failure, [`Error::BufferOverflow`], is the signal to transmit the
//! batch. A row is all-or-nothing: on overflow the span list and the arena
//! cursor are exactly as they were before the call.

use std::{
    fmt::{self, Write as _},
    io::IoSlice,
    ops::Range,
};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::{Config, Error, row::Row, row::RowGenerator};

const PLUS: &[u8] = b"+";
const CRLF: &[u8] = b"\r\n";

/// The arena capacity used unless configured otherwise, 24 KiB.
pub const DEFAULT_ARENA_CAPACITY: usize = 24 * 1024;

/// The default arena capacity as a [`byte_unit::Byte`], for configuration.
#[must_use]
pub fn default_arena_capacity() -> byte_unit::Byte {
    byte_unit::Byte::from_u64(DEFAULT_ARENA_CAPACITY as u64)
}

/// A reference to bytes that make up part of a batch, in transmission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span {
    /// A protocol literal.
    Literal(&'static [u8]),
    /// The series name of the encoder's [`RowGenerator`].
    Series,
    /// A committed region of the arena.
    Arena(Range<usize>),
}

/// The batch state of a [`FrameEncoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Rows may be added.
    Ready,
    /// A row failed to fit. Only [`FrameEncoder::reset`] leaves this state.
    Full,
}

/// Serializes rows of one series into a fixed-capacity arena.
#[derive(Debug)]
pub struct FrameEncoder {
    rows: RowGenerator,
    arena: Box<[u8]>,
    pos: usize,
    spans: Vec<Span>,
    state: State,
    /// The generator's current row overflowed the previous batch and has not
    /// been sent yet.
    pending: bool,
    batch_rows: usize,
}

impl FrameEncoder {
    /// Create a new [`FrameEncoder`] with an arena of `capacity` bytes.
    #[must_use]
    pub fn new(rows: RowGenerator, capacity: usize) -> Self {
        Self {
            rows,
            arena: vec![0; capacity].into_boxed_slice(),
            pos: 0,
            spans: Vec::new(),
            state: State::Ready,
            pending: false,
            batch_rows: 0,
        }
    }

    /// Create a new [`FrameEncoder`] from series configuration.
    ///
    /// # Errors
    ///
    /// Function will return an error if the value configuration is invalid.
    pub fn from_config(
        config: &Config,
        capacity: usize,
        seed: Option<[u8; 32]>,
    ) -> Result<Self, Error> {
        Ok(Self::new(RowGenerator::from_config(config, seed)?, capacity))
    }

    /// Discard the current batch. Idempotent.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.spans.clear();
        self.state = State::Ready;
        self.batch_rows = 0;
    }

    /// Frame one row onto the end of the current batch.
    ///
    /// The row is the generator's next row, unless the previous call
    /// overflowed, in which case that row is framed again so that no row is
    /// lost between batches.
    ///
    /// # Errors
    ///
    /// Function will return [`Error::BufferOverflow`] if the row does not fit
    /// in the remaining arena. The batch is left untouched. Subsequent calls
    /// return [`Error::EncoderFull`] until [`FrameEncoder::reset`] is called.
    pub fn add_one(&mut self) -> Result<(), Error> {
        if self.state == State::Full {
            return Err(Error::EncoderFull);
        }

        let checkpoint = self.spans.len();
        let row = if self.pending {
            self.rows.current()
        } else {
            self.rows.next_row()
        };

        self.spans
            .extend([Span::Literal(PLUS), Span::Series, Span::Literal(CRLF)]);

        let start = self.pos;
        match encode_row(&mut self.arena, start, &row) {
            Ok(end) => {
                self.spans.push(Span::Arena(start..end));
                self.pos = end;
                self.pending = false;
                self.batch_rows += 1;
                Ok(())
            }
            Err(err) => {
                self.spans.truncate(checkpoint);
                self.state = State::Full;
                self.pending = true;
                trace!(
                    "batch full after {} rows, {} of {} bytes",
                    self.batch_rows,
                    self.pos,
                    self.arena.len()
                );
                Err(err)
            }
        }
    }

    /// Reset, then add rows until the arena is full. Returns the number of
    /// rows in the batch.
    pub fn fill(&mut self) -> usize {
        self.reset();
        while self.add_one().is_ok() {}
        self.batch_rows
    }

    /// The spans of the current batch, in transmission order.
    #[must_use]
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// The bytes a span refers to.
    #[must_use]
    pub fn resolve(&self, span: &Span) -> &[u8] {
        match span {
            Span::Literal(literal) => *literal,
            Span::Series => &self.rows.series()[..],
            Span::Arena(range) => &self.arena[range.clone()],
        }
    }

    /// The current batch as vectored IO slices, in transmission order.
    #[must_use]
    pub fn io_slices(&self) -> Vec<IoSlice<'_>> {
        self.spans
            .iter()
            .map(|span| IoSlice::new(self.resolve(span)))
            .collect()
    }

    /// The current batch copied into one contiguous buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(self.batch_len());
        for span in &self.spans {
            bytes.put_slice(self.resolve(span));
        }
        bytes.freeze()
    }

    /// Total bytes referenced by the current batch.
    #[must_use]
    pub fn batch_len(&self) -> usize {
        self.spans.iter().map(|span| self.resolve(span).len()).sum()
    }

    /// The number of rows in the current batch.
    #[must_use]
    pub fn batch_rows(&self) -> usize {
        self.batch_rows
    }

    /// The arena write cursor.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The arena capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.arena.len()
    }

    /// The batch state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Whether the batch is full.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.state == State::Full
    }

    /// The underlying row generator.
    #[must_use]
    pub fn rows(&self) -> &RowGenerator {
        &self.rows
    }
}

/// Format the arena-backed lines of `row` starting at `start`. Returns the end
/// of the written region.
fn encode_row(arena: &mut [u8], start: usize, row: &Row<'_>) -> Result<usize, Error> {
    let mut cursor = Cursor { arena, pos: start };
    cursor.put(format_args!("+{}\r\n", row.timestamp))?;
    cursor.put(format_args!("*{}\r\n", row.values.len()))?;
    for value in row.values {
        // Debug formatting is the shortest representation that round-trips.
        cursor.put(format_args!("+{value:?}\r\n"))?;
    }
    Ok(cursor.pos)
}

struct Cursor<'a> {
    arena: &'a mut [u8],
    pos: usize,
}

impl Cursor<'_> {
    /// Write one field. On failure the cursor is not moved.
    fn put(&mut self, args: fmt::Arguments<'_>) -> Result<(), Error> {
        let mark = self.pos;
        if self.write_fmt(args).is_err() {
            self.pos = mark;
            return Err(Error::BufferOverflow {
                required: Counter::measure(args),
                remaining: self.arena.len() - mark,
            });
        }
        Ok(())
    }
}

impl fmt::Write for Cursor<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.pos.checked_add(s.len()).ok_or(fmt::Error)?;
        let window = self.arena.get_mut(self.pos..end).ok_or(fmt::Error)?;
        window.copy_from_slice(s.as_bytes());
        self.pos = end;
        Ok(())
    }
}

struct Counter(usize);

impl Counter {
    /// The formatted length of `args`.
    fn measure(args: fmt::Arguments<'_>) -> usize {
        let mut counter = Counter(0);
        fmt::write(&mut counter, args).map_or(usize::MAX, |()| counter.0)
    }
}

impl fmt::Write for Counter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0 += s.len();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::{FrameEncoder, Span, State};
    use crate::{
        Error, decode, row::RowGenerator, timestamp::Timestamps, value::RandomWalk,
    };

    const SERIES: &str = "foo|bar tag=value";

    fn encoder(capacity: usize, count: usize, seed: [u8; 32]) -> FrameEncoder {
        let rows = RowGenerator::new(
            SERIES,
            Timestamps::new(10_000_000_000, 100_000),
            RandomWalk::with_seed(count, 10.0, 0.0, 0.001, seed).unwrap(),
        );
        FrameEncoder::new(rows, capacity)
    }

    #[test]
    fn batch_of_rows_until_overflow() {
        let mut enc = encoder(24_576, 2, [0; 32]);
        enc.reset();

        let mut added = 0;
        loop {
            let before = enc.spans().len();
            match enc.add_one() {
                Ok(()) => {
                    added += 1;
                    assert_eq!(enc.spans().len(), before + 4);
                    assert!(matches!(enc.spans()[before + 3], Span::Arena(_)));
                }
                Err(Error::BufferOverflow { .. }) => {
                    assert_eq!(enc.spans().len(), before);
                    break;
                }
                Err(err) => panic!("unexpected error: {err}"),
            }
        }
        assert!(added > 0);
        assert_eq!(enc.batch_rows(), added);
        assert_eq!(enc.state(), State::Full);

        let rows = decode::decode(&enc.to_bytes()).unwrap();
        assert_eq!(rows.len(), added);
        assert_eq!(rows[0].timestamp, 10_000_100_000);
        for (k, row) in rows.iter().enumerate() {
            assert_eq!(&row.series[..], SERIES.as_bytes());
            assert_eq!(row.values.len(), 2);
            assert_eq!(row.timestamp, 10_000_000_000 + (k as u64 + 1) * 100_000);
        }
    }

    #[test]
    fn first_frame_is_well_formed() {
        let mut enc = encoder(1024, 2, [9; 32]);
        enc.add_one().unwrap();
        let bytes = enc.to_bytes();
        let text = std::str::from_utf8(&bytes).unwrap();
        let lines: Vec<&str> = text.split_terminator("\r\n").collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "+foo|bar tag=value");
        assert_eq!(lines[1], "+10000100000");
        assert_eq!(lines[2], "*2");
        let values = enc.rows().current().values;
        assert_eq!(lines[3][1..].parse::<f64>().unwrap(), values[0]);
        assert_eq!(lines[4][1..].parse::<f64>().unwrap(), values[1]);
        assert!(text.ends_with("\r\n"));
    }

    #[test]
    fn tiny_arena_overflows_immediately() {
        let mut enc = encoder(1, 2, [0; 32]);
        enc.reset();
        assert!(matches!(
            enc.add_one(),
            Err(Error::BufferOverflow {
                required: 14,
                remaining: 1
            })
        ));
        assert!(enc.spans().is_empty());
        assert_eq!(enc.position(), 0);
        assert_eq!(enc.fill(), 0);
    }

    #[test]
    fn overflow_reports_the_field_that_did_not_fit() {
        // "+10000100000\r\n" fits exactly, "*2\r\n" does not.
        let mut enc = encoder(15, 2, [0; 32]);
        enc.reset();
        assert_eq!(
            enc.add_one(),
            Err(Error::BufferOverflow {
                required: 4,
                remaining: 1
            })
        );
        assert!(enc.spans().is_empty());
        assert_eq!(enc.position(), 0);
    }

    #[test]
    fn full_encoder_requires_reset() {
        let mut enc = encoder(1, 1, [0; 32]);
        assert!(enc.add_one().is_err());
        assert_eq!(enc.add_one(), Err(Error::EncoderFull));
        enc.reset();
        assert_eq!(enc.state(), State::Ready);
        assert!(matches!(enc.add_one(), Err(Error::BufferOverflow { .. })));
    }

    #[test]
    fn reset_is_idempotent() {
        let mut enc = encoder(256, 1, [0; 32]);
        enc.reset();
        enc.reset();
        assert_eq!(enc.position(), 0);
        assert!(enc.spans().is_empty());
        enc.add_one().unwrap();
        assert!(enc.position() > 0);
        enc.reset();
        assert_eq!(enc.position(), 0);
        assert!(enc.spans().is_empty());
        assert_eq!(enc.batch_rows(), 0);
    }

    #[test]
    fn overflowed_row_opens_next_batch() {
        let mut enc = encoder(512, 3, [5; 32]);
        assert!(enc.fill() > 0);
        let last = decode::decode(&enc.to_bytes()).unwrap().pop().unwrap();
        assert!(enc.fill() > 0);
        let next = decode::decode(&enc.to_bytes()).unwrap();
        assert_eq!(next[0].timestamp, last.timestamp + 100_000);
    }

    #[test]
    fn io_slices_match_contiguous_bytes() {
        let mut enc = encoder(4096, 4, [3; 32]);
        enc.fill();
        let gathered: Vec<u8> = enc
            .io_slices()
            .iter()
            .flat_map(|slice| slice.iter().copied())
            .collect();
        assert_eq!(gathered, enc.to_bytes().to_vec());
        assert_eq!(gathered.len(), enc.batch_len());
    }

    #[test]
    fn empty_walk_frames_zero_count() {
        let mut enc = encoder(64, 0, [0; 32]);
        enc.add_one().unwrap();
        assert_eq!(
            &enc.to_bytes()[..],
            b"+foo|bar tag=value\r\n+10000100000\r\n*0\r\n"
        );
    }

    // A failed `add_one` must leave the batch exactly as it was, header spans
    // included, whatever the capacity.
    proptest! {
        #[test]
        fn overflow_rolls_back_whole_row(seed: [u8; 32], capacity in 0..2048usize, count in 0..32usize) {
            let mut enc = encoder(capacity, count, seed);
            enc.reset();
            loop {
                let spans = enc.spans().to_vec();
                let pos = enc.position();
                let bytes = enc.to_bytes();
                if enc.add_one().is_err() {
                    prop_assert_eq!(enc.spans(), spans.as_slice());
                    prop_assert_eq!(enc.position(), pos);
                    prop_assert_eq!(enc.to_bytes(), bytes);
                    break;
                }
                prop_assert!(enc.position() <= enc.capacity());
            }
        }

        #[test]
        fn every_batch_decodes(seed: [u8; 32], capacity in 64..4096usize, count in 1..16usize, batches in 1..8usize) {
            let mut enc = encoder(capacity, count, seed);
            let mut expected = 10_000_000_000u64;
            for _ in 0..batches {
                let added = enc.fill();
                let rows = decode::decode(&enc.to_bytes()).unwrap();
                prop_assert_eq!(rows.len(), added);
                for row in rows {
                    expected += 100_000;
                    prop_assert_eq!(row.timestamp, expected);
                    prop_assert_eq!(row.values.len(), count);
                }
            }
        }
    }
}
