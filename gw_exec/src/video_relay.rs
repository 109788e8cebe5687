//! # Video relay
//!
//! Video arrives from the rover as a continuous MJPEG byte stream cut into arbitrary chunks. The
//! [`FrameDemuxer`] recovers the individual JPEG images from it and [`multipart_stream`] re-emits
//! them as the parts of a `multipart/x-mixed-replace` HTTP response, which browsers display as
//! live video.
//!
//! The relay is pull driven: the next chunk is only read from upstream once the HTTP response has
//! taken the previous part, so a slow client slows the upstream down rather than growing a queue.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use bytes::{Buf, BufMut, Bytes, BytesMut};
use comms_if::eqpt::video::{JPEG_EOI, JPEG_SOI};
use futures_util::{stream, Stream, StreamExt};
use log::{debug, warn};
use std::fmt::Display;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Content type of the relayed stream.
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Extracts JPEG frames from an arbitrarily chunked byte stream.
///
/// Only the unconsumed bytes are kept. When a frame has started the buffer always begins with its
/// start marker.
#[derive(Debug)]
pub struct FrameDemuxer {
    buf: BytesMut,

    /// True once a start marker sits at the front of `buf`
    in_frame: bool,

    /// Position in `buf` from which the next marker search starts
    scan_pos: usize,

    max_frame_bytes: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl FrameDemuxer {
    /// Create a new demuxer. Frames still unterminated after `max_frame_bytes` are dropped.
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            in_frame: false,
            scan_pos: 0,
            max_frame_bytes,
        }
    }

    /// Append a chunk of the stream.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Number of buffered bytes not yet emitted or discarded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Get the next complete frame, or `None` if more input is needed.
    ///
    /// Call repeatedly after each [`FrameDemuxer::push`], a single chunk may complete several
    /// frames.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            if !self.in_frame {
                match find_marker(&self.buf[self.scan_pos..], &JPEG_SOI) {
                    Some(i) => {
                        // Resync by discarding everything before the start marker
                        let skip = self.scan_pos + i;
                        if skip > 0 {
                            debug!("Discarding {} bytes before start of frame", skip);
                        }
                        self.buf.advance(skip);
                        self.in_frame = true;
                        self.scan_pos = JPEG_SOI.len();
                    }
                    None => {
                        // No frame in sight, keep only a trailing byte which could begin a marker
                        let keep = match self.buf.last() {
                            Some(&b) if b == JPEG_SOI[0] => 1,
                            _ => 0,
                        };
                        let len = self.buf.len();
                        self.buf.advance(len - keep);
                        self.scan_pos = 0;
                        return None;
                    }
                }
            }

            match find_marker(&self.buf[self.scan_pos..], &JPEG_EOI) {
                Some(i) => {
                    let end = self.scan_pos + i + JPEG_EOI.len();
                    let frame = self.buf.split_to(end).freeze();
                    self.in_frame = false;
                    self.scan_pos = 0;
                    return Some(frame);
                }
                None if self.buf.len() > self.max_frame_bytes => {
                    warn!(
                        "Dropping unterminated frame after {} bytes (max {})",
                        self.buf.len(),
                        self.max_frame_bytes
                    );
                    // Skip the start marker and look for the next one
                    self.buf.advance(JPEG_SOI.len());
                    self.in_frame = false;
                    self.scan_pos = 0;
                }
                None => {
                    // The last byte may be the first half of the end marker
                    self.scan_pos = self.buf.len().saturating_sub(1).max(JPEG_SOI.len());
                    return None;
                }
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn find_marker(haystack: &[u8], marker: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == &marker[..])
}

/// Wrap a frame as one part of the multipart response.
pub fn encode_part(frame: &[u8]) -> Bytes {
    let header = format!(
        "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        frame.len()
    );

    let mut part = BytesMut::with_capacity(header.len() + frame.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(frame);
    part.put_slice(b"\r\n");

    part.freeze()
}

/// Relay an upstream byte stream as a stream of multipart parts.
///
/// The relay ends when the upstream ends. An upstream error is passed on once and then ends the
/// relay too.
pub fn multipart_stream<S, E>(
    upstream: S,
    demuxer: FrameDemuxer,
) -> impl Stream<Item = Result<Bytes, E>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    stream::unfold(
        Some((upstream, demuxer)),
        |state| async move {
            let (mut upstream, mut demuxer) = state?;

            loop {
                if let Some(frame) = demuxer.next_frame() {
                    return Some((Ok(encode_part(&frame)), Some((upstream, demuxer))));
                }

                match upstream.next().await {
                    Some(Ok(chunk)) => demuxer.push(&chunk),
                    Some(Err(e)) => {
                        warn!("Video upstream error, ending relay: {}", e);
                        return Some((Err(e), None));
                    }
                    None => {
                        debug!("Video upstream closed");
                        return None;
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use std::{
        convert::Infallible,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    /// A fake JPEG, the body avoids marker bytes
    fn frame(id: u8, len: usize) -> Vec<u8> {
        let mut f = JPEG_SOI.to_vec();
        f.extend((0..len).map(|i| (i as u8 ^ id) & 0x7F));
        f.extend_from_slice(&JPEG_EOI);
        f
    }

    fn drain(demuxer: &mut FrameDemuxer) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Some(f) = demuxer.next_frame() {
            frames.push(f);
        }
        frames
    }

    #[test]
    fn test_arbitrary_splits() {
        let frames = vec![frame(1, 10), frame(2, 0), frame(3, 37)];
        let stream: Vec<u8> = frames.concat();

        for chunk_size in 1..=stream.len() {
            let mut demuxer = FrameDemuxer::new(1024);
            let mut out = Vec::new();

            for chunk in stream.chunks(chunk_size) {
                demuxer.push(chunk);
                out.extend(drain(&mut demuxer));
            }

            assert_eq!(out.len(), frames.len(), "chunk size {}", chunk_size);
            for (got, want) in out.iter().zip(frames.iter()) {
                assert_eq!(&got[..], &want[..], "chunk size {}", chunk_size);
            }
            assert_eq!(demuxer.buffered(), 0);
        }
    }

    #[test]
    fn test_garbage_and_resync() {
        let mut demuxer = FrameDemuxer::new(1024);

        // Garbage alone, including a stray end marker, yields nothing and isn't kept
        demuxer.push(&[0x00, 0x12, 0xFF, 0xD9, 0x34, 0x56]);
        assert!(demuxer.next_frame().is_none());
        assert_eq!(demuxer.buffered(), 0);

        // A trailing 0xFF is kept in case it starts a marker
        demuxer.push(&[0x01, 0xFF]);
        assert!(demuxer.next_frame().is_none());
        assert_eq!(demuxer.buffered(), 1);

        let f = frame(7, 5);
        demuxer.push(&f[1..]);
        demuxer.push(&[0xAA, 0xBB]);
        let g = frame(8, 3);
        demuxer.push(&g);

        let out = drain(&mut demuxer);
        assert_eq!(out.len(), 2);
        assert_eq!(&out[0][..], &f[..]);
        assert_eq!(&out[1][..], &g[..]);
    }

    #[test]
    fn test_start_without_end_waits() {
        let mut demuxer = FrameDemuxer::new(1024);
        let f = frame(1, 20);

        demuxer.push(&f[..f.len() - 1]);
        assert!(demuxer.next_frame().is_none());
        assert!(demuxer.next_frame().is_none());

        demuxer.push(&f[f.len() - 1..]);
        assert_eq!(&demuxer.next_frame().unwrap()[..], &f[..]);
    }

    #[test]
    fn test_oversized_frame_dropped() {
        let mut demuxer = FrameDemuxer::new(16);

        // Never terminated
        let mut bad = JPEG_SOI.to_vec();
        bad.extend(std::iter::repeat(0x11).take(32));
        demuxer.push(&bad);
        assert!(demuxer.next_frame().is_none());
        assert!(demuxer.buffered() <= 16);

        let good = frame(2, 4);
        demuxer.push(&good);
        assert_eq!(&demuxer.next_frame().unwrap()[..], &good[..]);
    }

    #[test]
    fn test_encode_part() {
        let part = encode_part(&[0xFF, 0xD8, 0xFF, 0xD9]);

        let mut want = b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n".to_vec();
        want.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xD9]);
        want.extend_from_slice(b"\r\n");
        assert_eq!(&part[..], &want[..]);
    }

    #[tokio::test]
    async fn test_multipart_stream() {
        let f1 = frame(1, 8);
        let f2 = frame(2, 8);
        let joined = [f1.clone(), f2.clone()].concat();
        let chunks: Vec<Result<Bytes, Infallible>> = joined
            .chunks(3)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let parts: Vec<_> = multipart_stream(stream::iter(chunks), FrameDemuxer::new(1024))
            .collect()
            .await;

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].as_ref().unwrap(), &encode_part(&f1));
        assert_eq!(parts[1].as_ref().unwrap(), &encode_part(&f2));
    }

    #[tokio::test]
    async fn test_upstream_error_ends_relay() {
        let chunks: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from(frame(1, 4))),
            Err("gone".into()),
            Ok(Bytes::from(frame(2, 4))),
        ];

        let parts: Vec<_> = multipart_stream(stream::iter(chunks), FrameDemuxer::new(1024))
            .collect()
            .await;

        assert_eq!(parts.len(), 2);
        assert!(parts[0].is_ok());
        assert_eq!(parts[1].as_ref().unwrap_err(), "gone");
    }

    #[tokio::test]
    async fn test_stalled_output_stops_upstream_reads() {
        let reads = Arc::new(AtomicUsize::new(0));
        let reads_clone = reads.clone();

        // Endless upstream with one frame per chunk, counting reads
        let upstream = stream::repeat(()).map(move |_| {
            reads_clone.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(Bytes::from(frame(1, 4)))
        });

        let mut relay = Box::pin(multipart_stream(upstream, FrameDemuxer::new(1024)));

        relay.next().await.unwrap().unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        // Nothing is read while the output isn't pulling
        tokio::task::yield_now().await;
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        relay.next().await.unwrap().unwrap();
        relay.next().await.unwrap().unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 3);
    }
}
