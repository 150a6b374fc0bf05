//! Frame-Relay switch: a DLCI-indexed table of virtual circuits plus an LMI
//! (Local Management Interface) state machine on DLCI 0 / 1023.
//!
//! Each ingress frame's first two bytes encode a 10-bit DLCI split as
//! `dlci = ((byte0 & 0xFC) >> 2) << 4 | (byte1 & 0xF0) >> 4`, matching the
//! Q.922 address field layout. Non-LMI frames are rewritten in place with
//! the outbound DLCI (same bit layout, `vc.dlci_out`) and forwarded to the
//! circuit's output NIO.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rv_nio::NioEndpoint;

pub const DLCI_LMI_ANSI: u16 = 1023;

/// ANSI LMI packet header shared by status-enquiry requests and replies.
const LMI_ANSI_HDR: [u8; 7] = [0x00, 0x01, 0x03, 0x08, 0x00, 0x75, 0x95];
const LMI_STATUS_OFFSET: usize = 1;
const LMI_STATUS_REPLY: u8 = 0x75;

#[derive(Debug, thiserror::Error)]
pub enum FrSwitchError {
    #[error("VC for input {input:?} DLCI {dlci} already exists")]
    DuplicateVc { input: String, dlci: u16 },
    #[error("no VC for input {input:?} DLCI {dlci}")]
    NoSuchVc { input: String, dlci: u16 },
}

pub fn decode_dlci(header: &[u8; 2]) -> u16 {
    (((header[0] & 0xFC) as u16) << 2) | ((header[1] & 0xF0) as u16 >> 4)
}

fn encode_dlci(header: &mut [u8; 2], dlci: u16) {
    header[0] = (header[0] & 0x03) | (((dlci >> 4) as u8) << 2);
    header[1] = (header[1] & 0x0F) | (((dlci & 0x0F) as u8) << 4);
}

struct VirtualCircuit {
    input: Arc<NioEndpoint>,
    dlci_in: u16,
    output: Arc<NioEndpoint>,
    dlci_out: u16,
    packets_in: u64,
    packets_out: u64,
}

/// Per-interface LMI sequencing state; resynchronized whenever the peer's
/// sequence number doesn't match what was expected.
#[derive(Default)]
struct LmiState {
    last_rx_seq: u8,
    last_tx_seq: u8,
}

pub struct FrameRelaySwitch {
    vcs: Mutex<Vec<VirtualCircuit>>,
    lmi: Mutex<HashMap<String, LmiState>>,
    scratch: Mutex<Vec<u8>>,
}

impl Default for FrameRelaySwitch {
    fn default() -> Self {
        Self {
            vcs: Mutex::new(Vec::new()),
            lmi: Mutex::new(HashMap::new()),
            scratch: Mutex::new(Vec::with_capacity(2048)),
        }
    }
}

impl FrameRelaySwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_vc(
        &self,
        input: Arc<NioEndpoint>,
        dlci_in: u16,
        output: Arc<NioEndpoint>,
        dlci_out: u16,
    ) -> Result<(), FrSwitchError> {
        let mut vcs = self.vcs.lock().unwrap();
        if vcs
            .iter()
            .any(|vc| vc.input.name() == input.name() && vc.dlci_in == dlci_in)
        {
            return Err(FrSwitchError::DuplicateVc {
                input: input.name().to_string(),
                dlci: dlci_in,
            });
        }
        vcs.push(VirtualCircuit {
            input,
            dlci_in,
            output,
            dlci_out,
            packets_in: 0,
            packets_out: 0,
        });
        Ok(())
    }

    pub fn delete_vc(&self, input_name: &str, dlci_in: u16) -> Result<(), FrSwitchError> {
        let mut vcs = self.vcs.lock().unwrap();
        let before = vcs.len();
        vcs.retain(|vc| !(vc.input.name() == input_name && vc.dlci_in == dlci_in));
        if vcs.len() == before {
            return Err(FrSwitchError::NoSuchVc {
                input: input_name.to_string(),
                dlci: dlci_in,
            });
        }
        Ok(())
    }

    /// Handles one ingress frame from `input_name`. LMI frames (DLCI 0 or
    /// [`DLCI_LMI_ANSI`]) are answered in place via `reply`; other frames
    /// are rewritten with the outbound DLCI and forwarded to the matching
    /// VC's output NIO.
    pub fn handle_frame(&self, input: &Arc<NioEndpoint>, frame: &[u8]) {
        if frame.len() < 2 {
            return;
        }
        let header: [u8; 2] = [frame[0], frame[1]];
        let dlci = decode_dlci(&header);

        if dlci == 0 || dlci == DLCI_LMI_ANSI {
            self.handle_lmi(input, frame);
            return;
        }

        let mut vcs = self.vcs.lock().unwrap();
        let Some(vc) = vcs
            .iter_mut()
            .find(|vc| vc.input.name() == input.name() && vc.dlci_in == dlci)
        else {
            tracing::trace!(dlci, input = input.name(), "frame-relay: no VC for DLCI");
            return;
        };
        vc.packets_in += 1;

        let mut scratch = self.scratch.lock().unwrap();
        scratch.clear();
        scratch.extend_from_slice(frame);
        let mut out_header = [scratch[0], scratch[1]];
        encode_dlci(&mut out_header, vc.dlci_out);
        scratch[0] = out_header[0];
        scratch[1] = out_header[1];

        if let Err(e) = vc.output.send(&scratch) {
            tracing::warn!(error = %e, "frame-relay: forward failed");
        } else {
            vc.packets_out += 1;
        }
    }

    /// Parses an ANSI LMI status-enquiry (report-type + sequence-number
    /// items) and sends a status reply back on `input`, advertising the
    /// DLCIs of every VC attached to that interface.
    fn handle_lmi(&self, input: &Arc<NioEndpoint>, frame: &[u8]) {
        if frame.len() <= LMI_ANSI_HDR.len() || frame[..LMI_ANSI_HDR.len()] != LMI_ANSI_HDR {
            return;
        }

        let mut resp = self.scratch.lock().unwrap();
        resp.clear();
        resp.extend_from_slice(&LMI_ANSI_HDR);
        resp[LMI_STATUS_OFFSET] = LMI_STATUS_REPLY;

        let body = &frame[LMI_ANSI_HDR.len()..];
        let mut i = 0;
        let mut msg_type = None;
        let mut req_ssn = None;

        while i + 2 <= body.len() {
            let itype = body[i];
            let isize = body[i + 1] as usize;
            if i + 2 + isize > body.len() {
                tracing::warn!(input = input.name(), "frame-relay: truncated LMI item");
                return;
            }
            match itype {
                0x01 if isize == 1 => {
                    msg_type = Some(body[i + 2]);
                    resp.extend_from_slice(&[0x01, 0x01, body[i + 2]]);
                }
                0x03 if isize == 2 => {
                    let ssn = body[i + 2];
                    let rsn = body[i + 3];
                    req_ssn = Some(ssn);
                    let reply_ssn = ssn.wrapping_add(1);
                    resp.extend_from_slice(&[0x03, 0x02, reply_ssn, ssn]);

                    let mut lmi = self.lmi.lock().unwrap();
                    let state = lmi.entry(input.name().to_string()).or_default();
                    let expected = state.last_rx_seq.wrapping_add(1);
                    if state.last_tx_seq != 0 && ssn != expected {
                        tracing::debug!(input = input.name(), ssn, expected, "frame-relay: LMI resync");
                    }
                    state.last_rx_seq = ssn;
                    state.last_tx_seq = reply_ssn;
                    let _ = rsn;
                }
                _ => {
                    tracing::trace!(input = input.name(), itype, "frame-relay: unknown LMI item");
                    break;
                }
            }
            i += 2 + isize;
        }

        if msg_type.is_none() || req_ssn.is_none() {
            tracing::warn!(input = input.name(), "frame-relay: incomplete LMI packet");
            return;
        }

        {
            let vcs = self.vcs.lock().unwrap();
            for vc in vcs.iter().filter(|vc| vc.input.name() == input.name()) {
                let dlci = vc.dlci_in;
                resp.extend_from_slice(&[0x07, 0x03, (dlci >> 4) as u8, 0x80 | (((dlci & 0x0F) as u8) << 3), 0x82]);
            }
        }

        if let Err(e) = input.send(&resp) {
            tracing::warn!(error = %e, "frame-relay: LMI reply failed");
        }
    }

    pub fn vc_stats(&self, input_name: &str, dlci_in: u16) -> Option<(u64, u64)> {
        self.vcs
            .lock()
            .unwrap()
            .iter()
            .find(|vc| vc.input.name() == input_name && vc.dlci_in == dlci_in)
            .map(|vc| (vc.packets_in, vc.packets_out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rv_nio::{NioError, NullTransport, RecvOutcome, Transport};

    /// Records every frame handed to `send` so tests can inspect what a
    /// switch actually transmitted, rather than only its packet counters.
    struct RecordingTransport(Arc<Mutex<Vec<Vec<u8>>>>);

    impl Transport for RecordingTransport {
        fn send(&mut self, frame: &[u8]) -> Result<(), NioError> {
            self.0.lock().unwrap().push(frame.to_vec());
            Ok(())
        }
        fn recv(&mut self) -> Result<RecvOutcome, NioError> {
            Ok(RecvOutcome::WouldBlock)
        }
    }

    fn nio(name: &str) -> Arc<NioEndpoint> {
        Arc::new(NioEndpoint::new(name, Box::new(NullTransport)))
    }

    fn recording_nio(name: &str) -> (Arc<NioEndpoint>, Arc<Mutex<Vec<Vec<u8>>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let nio = Arc::new(NioEndpoint::new(name, Box::new(RecordingTransport(sent.clone()))));
        (nio, sent)
    }

    #[test]
    fn dlci_encode_decode_round_trips() {
        let mut header = [0u8, 0u8];
        encode_dlci(&mut header, 517);
        assert_eq!(decode_dlci(&header), 517);
    }

    #[test]
    fn duplicate_vc_is_rejected() {
        let sw = FrameRelaySwitch::new();
        let a = nio("a");
        let b = nio("b");
        sw.create_vc(a.clone(), 100, b.clone(), 200).unwrap();
        let err = sw.create_vc(a, 100, b, 201).unwrap_err();
        assert!(matches!(err, FrSwitchError::DuplicateVc { .. }));
    }

    #[test]
    fn non_lmi_frame_is_rewritten_with_outbound_dlci_and_counted() {
        let sw = FrameRelaySwitch::new();
        let a = nio("a");
        let (b, b_sent) = recording_nio("b");
        sw.create_vc(a.clone(), 100, b, 200).unwrap();

        let mut header = [0u8, 0u8];
        encode_dlci(&mut header, 100);
        let mut frame = header.to_vec();
        frame.extend_from_slice(b"payload");

        sw.handle_frame(&a, &frame);
        assert_eq!(sw.vc_stats("a", 100), Some((1, 1)));

        let sent = b_sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let out_header = [sent[0][0], sent[0][1]];
        assert_eq!(decode_dlci(&out_header), 200);
        assert_eq!(&sent[0][2..], b"payload");
    }

    #[test]
    fn lmi_frame_is_not_forwarded_as_data() {
        let sw = FrameRelaySwitch::new();
        let a = nio("a");
        let frame = vec![0x00, 0x01, 0x03, 0x08, 0x01, 0x00];
        sw.handle_frame(&a, &frame);
        assert_eq!(sw.vc_stats("a", 0), None);
    }

    /// Spec scenario: inject an ANSI LMI status-enquiry (report type 1,
    /// sequence 0x42/0x00) into `A` with a VC `A:100 -> B:200` attached;
    /// expect a reply on `A` with sequence fields (0x43, 0x42) listing
    /// DLCI 100.
    #[test]
    fn lmi_status_enquiry_gets_reply_with_sequence_and_dlci() {
        let sw = FrameRelaySwitch::new();
        let (a, a_sent) = recording_nio("a");
        let b = nio("b");
        sw.create_vc(a.clone(), 100, b, 200).unwrap();

        let mut frame = LMI_ANSI_HDR.to_vec();
        frame.extend_from_slice(&[0x01, 0x01, 0x01]); // report type 1
        frame.extend_from_slice(&[0x03, 0x02, 0x42, 0x00]); // SSN=0x42, RSN=0x00

        sw.handle_frame(&a, &frame);

        let sent = a_sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let reply = &sent[0];
        assert_eq!(&reply[..LMI_ANSI_HDR.len()], &LMI_ANSI_HDR[..]);
        assert_eq!(reply[LMI_ANSI_HDR.len()..][..3], [0x01, 0x01, 0x01]);
        let seq_item = &reply[LMI_ANSI_HDR.len() + 3..][..4];
        assert_eq!(seq_item, [0x03, 0x02, 0x43, 0x42]);
        let dlci_item = &reply[LMI_ANSI_HDR.len() + 7..][..5];
        assert_eq!(dlci_item[0], 0x07);
        assert_eq!(dlci_item[2], (100u16 >> 4) as u8);
        assert_eq!(dlci_item[3], 0x80 | (((100u16 & 0x0F) as u8) << 3));
    }
}
