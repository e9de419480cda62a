//! PCAP / PCAPNG file source.
//!
//! Reads legacy PCAP and PCAPNG captures through `pcap-parser`'s streaming
//! readers and pushes each frame into the engine channel. Only Ethernet
//! link layers decode further down the chain; other link types are pushed
//! anyway and simply stop at the root module.

use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{create_reader, Block, Linktype, PcapBlockOwned, PcapError};
use tracing::{debug, warn};

use crate::capture::{CaptureError, CaptureStats, PacketSource};
use crate::core::channel::Channel;
use crate::core::packet::Packet;

const READER_BUFFER_SIZE: usize = 65536;

/// Packet source backed by a PCAP or PCAPNG file.
pub struct PcapFileSource {
    reader: Box<dyn PcapReaderIterator>,
    warned_linktype: bool,
}

impl PcapFileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        let file = File::open(path.as_ref())?;
        let reader = create_reader(READER_BUFFER_SIZE, file).map_err(|e| CaptureError::Parse {
            context: "pcap reader init",
            message: e.to_string(),
        })?;
        debug!(path = %path.as_ref().display(), "opened capture file");
        Ok(Self {
            reader,
            warned_linktype: false,
        })
    }
}

fn warn_linktype(warned: &mut bool, linktype: Linktype) {
    if linktype != Linktype::ETHERNET && !*warned {
        warn!(
            linktype = linktype.0,
            "non-ethernet link type, frames will not decode"
        );
        *warned = true;
    }
}

fn push_frame(
    channel: &Channel<Packet>,
    stats: &mut CaptureStats,
    data: &[u8],
    wire_len: usize,
    tv_sec: i64,
    tv_usec: u32,
) {
    let mut slot = channel.retain();
    slot.load(data, wire_len, tv_sec, tv_usec);
    channel.push(slot);
    stats.packets += 1;
    stats.bytes += data.len();
}

impl PacketSource for PcapFileSource {
    fn run(
        &mut self,
        channel: &Channel<Packet>,
        stop: &AtomicBool,
    ) -> Result<CaptureStats, CaptureError> {
        let mut stats = CaptureStats {
            start_time: Some(SystemTime::now()),
            ..Default::default()
        };

        loop {
            if stop.load(Ordering::Relaxed) {
                debug!("capture interrupted");
                break;
            }
            match self.reader.next() {
                Ok((offset, block)) => {
                    match block {
                        PcapBlockOwned::LegacyHeader(header) => {
                            warn_linktype(&mut self.warned_linktype, header.network);
                        }
                        PcapBlockOwned::Legacy(packet) => {
                            let caplen = (packet.caplen as usize).min(packet.data.len());
                            push_frame(
                                channel,
                                &mut stats,
                                &packet.data[..caplen],
                                packet.origlen as usize,
                                i64::from(packet.ts_sec),
                                packet.ts_usec,
                            );
                        }
                        PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                            warn_linktype(&mut self.warned_linktype, idb.linktype);
                        }
                        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                            // Interfaces default to microsecond resolution.
                            let ts = (u64::from(epb.ts_high) << 32) | u64::from(epb.ts_low);
                            let caplen = (epb.caplen as usize).min(epb.data.len());
                            push_frame(
                                channel,
                                &mut stats,
                                &epb.data[..caplen],
                                epb.origlen as usize,
                                (ts / 1_000_000) as i64,
                                (ts % 1_000_000) as u32,
                            );
                        }
                        PcapBlockOwned::NG(_) => {}
                    }
                    self.reader.consume(offset);
                }
                Err(PcapError::Eof) => break,
                Err(PcapError::Incomplete(_)) => {
                    self.reader.refill().map_err(|e| CaptureError::Parse {
                        context: "pcap reader refill",
                        message: e.to_string(),
                    })?;
                }
                Err(e) => {
                    return Err(CaptureError::Parse {
                        context: "pcap reader next",
                        message: e.to_string(),
                    });
                }
            }
        }

        debug!(
            packets = stats.packets,
            bytes = stats.bytes,
            "capture file drained"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn legacy_pcap(frames: &[(&[u8], u32, u32)]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0xa1b2c3d4u32.to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&65535u32.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes()); // ethernet
        for (data, ts_sec, ts_usec) in frames {
            out.extend_from_slice(&ts_sec.to_le_bytes());
            out.extend_from_slice(&ts_usec.to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(data);
        }
        out
    }

    fn temp_file(name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("strix-test-{}-{}", std::process::id(), name));
        let mut file = File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn reads_legacy_frames_in_order() {
        let frames: Vec<(&[u8], u32, u32)> = vec![
            (&[1u8, 2, 3, 4][..], 100, 10),
            (&[5u8, 6][..], 100, 20),
            (&[7u8][..], 101, 0),
        ];
        let path = temp_file("legacy.pcap", &legacy_pcap(&frames));

        let mut source = PcapFileSource::open(&path).unwrap();
        let channel: Channel<Packet> = Channel::new();
        let stop = AtomicBool::new(false);
        let stats = source.run(&channel, &stop).unwrap();

        assert_eq!(stats.packets, 3);
        assert_eq!(stats.bytes, 7);
        for (data, ts_sec, ts_usec) in frames {
            let pkt = channel.pull().unwrap();
            assert_eq!(pkt.bytes(), data);
            assert_eq!(pkt.tv(), (i64::from(ts_sec), ts_usec));
            channel.release(pkt);
        }

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn stop_flag_interrupts_reading() {
        let frames: Vec<(&[u8], u32, u32)> = vec![(&[0u8; 8][..], 1, 0); 4];
        let path = temp_file("stop.pcap", &legacy_pcap(&frames));

        let mut source = PcapFileSource::open(&path).unwrap();
        let channel: Channel<Packet> = Channel::new();
        let stop = AtomicBool::new(true);
        let stats = source.run(&channel, &stop).unwrap();
        assert_eq!(stats.packets, 0);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn open_missing_file_fails() {
        assert!(PcapFileSource::open("/nonexistent/strix.pcap").is_err());
    }
}
