//! A tokio codec for the HL7 MLLP framing protocol.
//!
//! MLLP wraps each HL7 message in a single-byte envelope: a start-of-block
//! byte (`0x0B`), the message content, then an end-of-block byte (`0x1C`)
//! followed by a carriage return. This codec extracts those payloads from a
//! Tokio stream and wraps outgoing acknowledgements in the same envelope.
//!
//! Decoding is tolerant by design. Real-world senders interleave frames
//! without waiting for an acknowledgement, split frames across TCP segments,
//! omit the trailing carriage return, or leak stray bytes between frames.
//! None of that terminates the stream: the decoder scans forward for the
//! end-of-block byte, strips every start-of-block byte from the payload, and
//! leaves anything else for the validation layers above to judge.

use bytes::buf::{Buf, BufMut};
use bytes::BytesMut;
use log::{debug, trace};
use tokio_util::codec::*;

/// See the [module](self) documentation for the framing rules.
#[derive(Default)]
pub struct MllpCodec {
    // A frame can end exactly at a read boundary with its trailing CR still
    // in flight; remember to swallow that CR when the next bytes arrive.
    awaiting_trailing_cr: bool,
}

impl MllpCodec {
    const BLOCK_HEADER: u8 = 0x0B; //Vertical-Tab char, the marker for the start of a message
    const BLOCK_FOOTER: [u8; 2] = [0x1C, 0x0D]; //File-Separator char + CR, the marker for the end of a message

    /// Creates a new codec instance, generally for use within a [Tokio Framed](https://docs.rs/tokio-util/latest/tokio_util/codec/struct.Framed.html),
    /// but it can be instantiated standalone for testing purposes etc.
    /// Example:
    /// ```
    /// use hl7_mllp_server::MllpCodec;
    /// let mllp = MllpCodec::new();
    /// ```
    pub fn new() -> Self {
        MllpCodec {
            awaiting_trailing_cr: false,
        }
    }

    /// Finds the first end-of-block byte. We search from the start because
    /// eager publishers put multiple frames on the wire without waiting for
    /// an ack between them.
    fn get_footer_position(src: &BytesMut) -> Option<usize> {
        src.iter().position(|b| *b == MllpCodec::BLOCK_FOOTER[0])
    }

    /// Removes every start-of-block byte from the frame. The well formed
    /// case is a single leading byte; anything beyond that is a sender
    /// gluing junk between frames, which stays in the payload for the
    /// message parser to reject.
    fn strip_block_headers(frame: &mut BytesMut) {
        while frame.first() == Some(&MllpCodec::BLOCK_HEADER) {
            frame.advance(1);
        }
        if frame.iter().any(|b| *b == MllpCodec::BLOCK_HEADER) {
            trace!("MLLP: stripping interior start-of-block byte(s)");
            let kept: Vec<u8> = frame
                .iter()
                .copied()
                .filter(|b| *b != MllpCodec::BLOCK_HEADER)
                .collect();
            frame.clear();
            frame.extend_from_slice(&kept);
        }
    }
}

// Support encoding data as an MLLP frame.
// The listener uses this for ACK/NACK messages; a publisher can use it for the primary message.
impl Encoder<BytesMut> for MllpCodec {
    type Error = std::io::Error;

    fn encode(&mut self, event: BytesMut, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(event.len() + 3); //we need an extra 3 bytes of space on top of the message proper
        dst.put_u8(MllpCodec::BLOCK_HEADER); //header

        dst.put_slice(&event); //data

        dst.put_slice(&MllpCodec::BLOCK_FOOTER); //footer

        debug!("MLLP: Encoded value for send: '{:?}'", dst);
        Ok(())
    }
}

// Support decoding data from an MLLP frame.
// Payloads come out as raw bytes: frame reassembly is byte-level so a multi-byte
// character split across two reads arrives intact, and text decoding stays a
// separate concern for the connection layer.
impl Decoder for MllpCodec {
    type Item = BytesMut;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.awaiting_trailing_cr {
            if src.is_empty() {
                return Ok(None);
            }
            if src[0] == MllpCodec::BLOCK_FOOTER[1] {
                src.advance(1);
            }
            self.awaiting_trailing_cr = false;
        }

        let Some(end_offset) = MllpCodec::get_footer_position(src) else {
            trace!("MLLP: no end-of-block in {} buffered byte(s) yet", src.len());
            return Ok(None); //partial frame, the framed reader keeps the bytes until more arrive
        };

        let mut frame = src.split_to(end_offset);
        src.advance(1); //the end-of-block byte itself

        if src.is_empty() {
            //the trailing CR may be sitting in the next read, or missing entirely
            self.awaiting_trailing_cr = true;
        } else if src[0] == MllpCodec::BLOCK_FOOTER[1] {
            src.advance(1);
        }

        MllpCodec::strip_block_headers(&mut frame);
        debug!("MLLP: decoded a frame of {} byte(s)", frame.len());
        Ok(Some(frame))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                // a peer that disconnects mid-frame is not an error worth
                // surfacing, drop the unterminated bytes
                if !src.is_empty() {
                    debug!(
                        "MLLP: discarding {} unterminated byte(s) at stream end",
                        src.len()
                    );
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}
