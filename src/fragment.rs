//! EDBG fragmentation of JTAGICE3 packets into 64-byte HID reports.
//!
//! Every report carries a four byte header followed by up to 60 bytes of
//! packet data:
//!
//! | byte | meaning                                                      |
//! |------|--------------------------------------------------------------|
//! | 0    | `0x80` host to device chunk, `0x81` device to host pull       |
//! | 1    | `fragment_index << 4 \| end_fragment_count`                   |
//! | 2    | reserved, always zero from the device                        |
//! | 3    | chunk payload length                                         |
//!
//! Fragments are numbered from 1. Nothing is retried here, a lost
//! fragment makes the host resend the whole packet.

use log::{trace, warn};

use crate::packet::{ReplyHeader, MAX_REPLY_LEN, MAX_REQUEST_LEN};

/// Size of a HID report on the DAP endpoints.
pub const REPORT_SIZE: usize = 64;

/// One HID report.
pub type Report = [u8; REPORT_SIZE];

/// Packet bytes carried by one fragment.
pub const CHUNK_SIZE: usize = 60;

const HEADER_SIZE: usize = REPORT_SIZE - CHUNK_SIZE;

/// Inbound packets may span at most this many fragments.
pub const MAX_INBOUND_FRAGMENTS: u8 = (MAX_REQUEST_LEN / CHUNK_SIZE) as u8;

/// Reasons a chunk is answered with `FAIL`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FragmentError {
    /// Declared fragment count is above what fits the reassembly buffer.
    TooManyFragments(u8),
    /// Fragment index is zero or past the declared end.
    BadIndex {
        /// Index found in the header.
        index: u8,
        /// End fragment count found in the header.
        end: u8,
    },
    /// Chunk size byte is larger than a report can carry.
    Oversized(u8),
    /// The final fragment arrived but some earlier one did not.
    MissingFragment {
        /// Fragments seen for this packet.
        received: u8,
        /// Fragments declared.
        expected: u8,
    },
}

/// Progress of the packet being reassembled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Chunk {
    /// Fragment stored, more are expected.
    Partial,
    /// The final fragment arrived and every fragment was seen.
    Complete,
}

/// Rebuilds a request from `0x80` chunk reports.
pub struct Reassembler {
    buf: [u8; MAX_REQUEST_LEN],
    chunks_received: u8,
    length: usize,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    /// Creates an empty reassembler.
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_REQUEST_LEN],
            chunks_received: 0,
            length: 0,
        }
    }

    /// Forgets any partially received packet.
    pub fn reset(&mut self) {
        self.chunks_received = 0;
        self.length = 0;
    }

    /// Fragments counted so far for the current packet.
    pub fn chunks_received(&self) -> u8 {
        self.chunks_received
    }

    /// The last completed packet.
    pub fn packet(&self) -> &[u8] {
        &self.buf[..self.length]
    }

    /// Stores one chunk report.
    ///
    /// A packet is delivered only when the fragment whose index equals the
    /// declared end count arrives and every fragment before it was counted.
    pub fn accept(&mut self, report: &Report) -> Result<Chunk, FragmentError> {
        let end = report[1] & 0x0F;
        let index = report[1] >> 4;
        let size = report[3];

        if end > MAX_INBOUND_FRAGMENTS {
            return Err(FragmentError::TooManyFragments(end));
        }
        if index == 0 || index > end {
            return Err(FragmentError::BadIndex { index, end });
        }
        if size as usize > CHUNK_SIZE {
            return Err(FragmentError::Oversized(size));
        }

        // a new packet always starts at the first fragment
        if index == 1 {
            self.chunks_received = 0;
        }
        self.chunks_received = self.chunks_received.saturating_add(1);

        let offset = (index as usize - 1) * CHUNK_SIZE;
        let size = size as usize;
        self.buf[offset..offset + size].copy_from_slice(&report[HEADER_SIZE..HEADER_SIZE + size]);
        trace!("chunk {}/{} size={} at {}", index, end, size, offset);

        if index != end {
            return Ok(Chunk::Partial);
        }

        let received = self.chunks_received;
        self.chunks_received = 0;
        if received != end {
            warn!("fragment lost: got {} of {}", received, end);
            return Err(FragmentError::MissingFragment {
                received,
                expected: end,
            });
        }

        self.length = offset + size;
        Ok(Chunk::Complete)
    }
}

/// Number of fragments needed for a reply carrying `data_len` bytes of data.
///
/// The six header bytes ride in the same fragments, so this is
/// `ceil((data_len + 6) / 60)`.
pub const fn reply_fragment_count(data_len: usize) -> u8 {
    ((data_len + 65) / CHUNK_SIZE) as u8
}

/// Serves a queued reply frame to `0x81` pull reports.
pub struct Fragmenter {
    frame: [u8; MAX_REPLY_LEN],
    remaining: usize,
    fragment_index: u8,
    end_fragment_count: u8,
}

impl Default for Fragmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl Fragmenter {
    /// Creates a fragmenter with nothing queued.
    pub const fn new() -> Self {
        Self {
            frame: [0; MAX_REPLY_LEN],
            remaining: 0,
            fragment_index: 0,
            end_fragment_count: 0,
        }
    }

    /// Drops the queued reply, if any.
    pub fn clear(&mut self) {
        self.remaining = 0;
        self.fragment_index = 0;
        self.end_fragment_count = 0;
    }

    /// `true` while fragments of a reply are still to be pulled.
    pub fn is_pending(&self) -> bool {
        self.end_fragment_count != 0
    }

    /// Declared fragment count of the queued reply, 0 when idle.
    pub fn end_fragment_count(&self) -> u8 {
        self.end_fragment_count
    }

    /// Data area of the next reply, right after the header.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.frame[ReplyHeader::LEN..]
    }

    /// Finalizes the reply whose data was written through
    /// [`data_mut()`](Fragmenter::data_mut) and queues it for sending.
    ///
    /// The last byte of the frame is the end-of-transfer status and is
    /// always zero.
    pub fn queue(&mut self, header: ReplyHeader, data_len: usize) {
        let data_len = data_len.min(MAX_REPLY_LEN - ReplyHeader::LEN);
        let frame_len = data_len + ReplyHeader::LEN;

        header.encode(&mut self.frame);
        self.frame[frame_len - 1] = 0;

        self.remaining = frame_len;
        self.fragment_index = 0;
        self.end_fragment_count = reply_fragment_count(data_len);
        trace!(
            "reply seq={} len={} fragments={}",
            header.sequence,
            frame_len,
            self.end_fragment_count
        );
    }

    /// Fills a `0x81` response report with the next fragment.
    ///
    /// Once the final fragment went out, or when nothing is queued, the
    /// report announces no data.
    pub fn next_fragment(&mut self, report: &mut Report) {
        report[2] = 0;

        if self.end_fragment_count == 0 {
            report[1] = 0;
            report[3] = 0;
            return;
        }

        let offset = self.fragment_index as usize * CHUNK_SIZE;
        self.fragment_index += 1;
        let last = self.fragment_index == self.end_fragment_count;
        let size = if last {
            self.remaining.min(CHUNK_SIZE)
        } else {
            CHUNK_SIZE
        };

        report[1] = (self.fragment_index << 4) | self.end_fragment_count;
        report[3] = size as u8;
        report[HEADER_SIZE..HEADER_SIZE + size].copy_from_slice(&self.frame[offset..offset + size]);
        report[HEADER_SIZE + size..].fill(0);

        self.remaining = self.remaining.saturating_sub(CHUNK_SIZE);
        if last {
            self.clear();
        }
    }
}
