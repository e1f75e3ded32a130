use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use pstream_frame::{Memblock, MemblockSlice, Memchunk, Packet};
use pstream_stream::{Mainloop, Stream, StreamStats};
use pstream_transport::{IoChannel, MemoryChannel};
use serde::Serialize;
use tracing::debug;

use crate::cmd::{LoopbackArgs, Transport};
use crate::exit::{
    stream_error, CliError, CliResult, DATA_INVALID, SUCCESS, TRANSPORT_ERROR, USAGE,
};
use crate::output::{print_json, print_table, OutputFormat};

const MAX_REPORTED_MISMATCHES: usize = 8;

/// What one loopback run sends.
#[derive(Debug, Clone, Copy)]
struct Plan {
    packets: usize,
    memblocks: usize,
    size: usize,
    channel: u32,
    delta: i32,
}

impl Plan {
    fn from_args(args: &LoopbackArgs) -> CliResult<Self> {
        if args.memblocks > 0 && args.size == 0 {
            return Err(CliError::new(
                USAGE,
                "memblocks need --size greater than zero (empty memblocks deliver no data)",
            ));
        }
        Ok(Self {
            packets: args.packets,
            memblocks: args.memblocks,
            size: args.size,
            channel: args.channel,
            delta: args.delta,
        })
    }

    /// Deterministic contents for frame number `seq`.
    fn payload(&self, seq: usize) -> Vec<u8> {
        (0..self.size).map(|i| ((i + seq) % 251) as u8).collect()
    }
}

#[derive(Debug)]
struct ReceivedBlock {
    channel: u32,
    delta: i32,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct Inbox {
    packets: Vec<Packet>,
    memblocks: Vec<ReceivedBlock>,
    slices: u64,
    memblock_bytes: usize,
}

impl Inbox {
    fn push_slice(&mut self, slice: MemblockSlice) {
        self.slices += 1;
        self.memblock_bytes += slice.chunk.len();
        if slice.offset > 0 {
            if let Some(block) = self.memblocks.last_mut() {
                block.data.extend_from_slice(slice.chunk.as_slice());
                return;
            }
        }
        self.memblocks.push(ReceivedBlock {
            channel: slice.channel,
            delta: slice.delta,
            data: slice.chunk.as_slice().to_vec(),
        });
    }

    fn is_complete(&self, plan: &Plan) -> bool {
        self.packets.len() >= plan.packets
            && self.memblock_bytes >= plan.memblocks * plan.size
    }
}

#[derive(Debug, Serialize)]
struct LoopbackReport {
    transport: &'static str,
    max_io: Option<usize>,
    frame_size: usize,
    packets_sent: usize,
    memblocks_sent: usize,
    packets_received: usize,
    memblocks_received: usize,
    memblock_slices: u64,
    turns: usize,
    elapsed_ms: f64,
    verified: bool,
    mismatches: Vec<String>,
    sender: StreamStats,
    receiver: StreamStats,
}

pub fn run(args: LoopbackArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_timeout(&args.timeout)?;
    let plan = Plan::from_args(&args)?;
    if args.max_io == Some(0) {
        return Err(CliError::new(USAGE, "--max-io must be greater than zero"));
    }

    let mainloop = Mainloop::new();
    let report = match args.transport {
        Transport::Memory => {
            let (a, b) = MemoryChannel::pair();
            a.set_max_io(args.max_io);
            b.set_max_io(args.max_io);
            exchange(&mainloop, a, b, &plan, timeout, "memory", args.max_io)?
        }
        Transport::Unix => unix_exchange(&mainloop, &plan, timeout, args.max_io)?,
    };

    print_report(&report, format);
    if !report.verified {
        return Err(CliError::new(
            DATA_INVALID,
            format!("loopback verification failed: {}", report.mismatches.join("; ")),
        ));
    }
    Ok(SUCCESS)
}

#[cfg(unix)]
fn unix_exchange(
    mainloop: &Mainloop,
    plan: &Plan,
    timeout: Duration,
    max_io: Option<usize>,
) -> CliResult<LoopbackReport> {
    if max_io.is_some() {
        return Err(CliError::new(USAGE, "--max-io requires --transport memory"));
    }
    let (a, b) = pstream_transport::UnixChannel::pair()
        .map_err(|err| crate::exit::transport_error("socket pair", err))?;
    exchange(mainloop, a, b, plan, timeout, "unix", None)
}

#[cfg(not(unix))]
fn unix_exchange(
    _mainloop: &Mainloop,
    _plan: &Plan,
    _timeout: Duration,
    _max_io: Option<usize>,
) -> CliResult<LoopbackReport> {
    Err(CliError::new(
        USAGE,
        "unix transport is not available on this platform",
    ))
}

fn exchange<C: IoChannel>(
    mainloop: &Mainloop,
    a: C,
    b: C,
    plan: &Plan,
    timeout: Duration,
    transport: &'static str,
    max_io: Option<usize>,
) -> CliResult<LoopbackReport> {
    let mut tx = Stream::new(mainloop, a);
    let mut rx = Stream::new(mainloop, b);

    let inbox = Rc::new(RefCell::new(Inbox::default()));
    let sink = Rc::clone(&inbox);
    rx.set_packet_callback(move |packet| sink.borrow_mut().packets.push(packet));
    let sink = Rc::clone(&inbox);
    rx.set_memblock_callback(move |slice| sink.borrow_mut().push_slice(slice));

    // Packets take even sequence numbers and memblocks odd ones.
    for k in 0..plan.packets.max(plan.memblocks) {
        if k < plan.packets {
            tx.send_packet(Packet::from(plan.payload(2 * k)))
                .map_err(|err| stream_error("enqueue packet", err))?;
        }
        if k < plan.memblocks {
            let chunk = Memchunk::whole(Memblock::from(plan.payload(2 * k + 1)));
            tx.send_memblock(plan.channel, plan.delta, chunk)
                .map_err(|err| stream_error("enqueue memblock", err))?;
        }
    }
    debug!(transport, queued = tx.queued(), "loopback frames queued");

    let started = Instant::now();
    let probe = Rc::clone(&inbox);
    let outcome = mainloop.run_until(&mut [&mut tx, &mut rx], timeout, || {
        probe.borrow().is_complete(plan)
    });
    let elapsed = started.elapsed();

    let turns = match outcome {
        Ok(turns) => turns,
        Err(err) => {
            if let Some(cause) = tx.death_cause().or_else(|| rx.death_cause()) {
                return Err(CliError::new(
                    TRANSPORT_ERROR,
                    format!("stream died: {cause}"),
                ));
            }
            return Err(stream_error("loopback", err));
        }
    };

    let inbox = inbox.borrow();
    let mismatches = verify(plan, &inbox);
    debug!(turns, verified = mismatches.is_empty(), "loopback finished");

    Ok(LoopbackReport {
        transport,
        max_io,
        frame_size: plan.size,
        packets_sent: plan.packets,
        memblocks_sent: plan.memblocks,
        packets_received: inbox.packets.len(),
        memblocks_received: inbox.memblocks.len(),
        memblock_slices: inbox.slices,
        turns,
        elapsed_ms: (elapsed.as_secs_f64() * 1000.0 * 100.0).round() / 100.0,
        verified: mismatches.is_empty(),
        mismatches,
        sender: tx.stats(),
        receiver: rx.stats(),
    })
}

fn verify(plan: &Plan, inbox: &Inbox) -> Vec<String> {
    let mut mismatches = Vec::new();

    if inbox.packets.len() != plan.packets {
        mismatches.push(format!(
            "expected {} packets, received {}",
            plan.packets,
            inbox.packets.len()
        ));
    }
    for (i, packet) in inbox.packets.iter().enumerate() {
        if packet.data() != plan.payload(2 * i).as_slice() {
            mismatches.push(format!("packet {i}: payload differs"));
        }
    }

    if inbox.memblocks.len() != plan.memblocks {
        mismatches.push(format!(
            "expected {} memblocks, received {}",
            plan.memblocks,
            inbox.memblocks.len()
        ));
    }
    for (i, block) in inbox.memblocks.iter().enumerate() {
        if block.channel != plan.channel || block.delta != plan.delta {
            mismatches.push(format!(
                "memblock {i}: tagged channel {} delta {}",
                block.channel, block.delta
            ));
        } else if block.data != plan.payload(2 * i + 1) {
            mismatches.push(format!("memblock {i}: payload differs"));
        }
    }

    mismatches.truncate(MAX_REPORTED_MISMATCHES);
    mismatches
}

fn print_report(report: &LoopbackReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => print_table(report_rows(report)),
        OutputFormat::Pretty => {
            let verdict = if report.verified { "ok" } else { "MISMATCH" };
            println!("loopback over {}: {verdict}", report.transport);
            println!(
                "  sent:     {} packets, {} memblocks of {} bytes",
                report.packets_sent, report.memblocks_sent, report.frame_size
            );
            println!(
                "  received: {} packets, {} memblocks in {} slices",
                report.packets_received, report.memblocks_received, report.memblock_slices
            );
            println!(
                "  loop:     {} turns in {:.2}ms",
                report.turns, report.elapsed_ms
            );
            for mismatch in &report.mismatches {
                println!("  mismatch: {mismatch}");
            }
        }
    }
}

fn report_rows(report: &LoopbackReport) -> Vec<(&'static str, String)> {
    vec![
        ("transport", report.transport.to_string()),
        (
            "max_io",
            report
                .max_io
                .map_or_else(|| "unlimited".to_string(), |n| n.to_string()),
        ),
        ("frame_size", report.frame_size.to_string()),
        (
            "packets",
            format!("{} / {}", report.packets_received, report.packets_sent),
        ),
        (
            "memblocks",
            format!("{} / {}", report.memblocks_received, report.memblocks_sent),
        ),
        ("memblock_slices", report.memblock_slices.to_string()),
        ("bytes_sent", report.sender.payload_bytes_sent.to_string()),
        (
            "bytes_received",
            report.receiver.payload_bytes_received.to_string(),
        ),
        ("turns", report.turns.to_string()),
        ("elapsed_ms", format!("{:.2}", report.elapsed_ms)),
        ("verified", report.verified.to_string()),
    ]
}

fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "timeout must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid timeout value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(packets: usize, memblocks: usize, size: usize) -> Plan {
        Plan {
            packets,
            memblocks,
            size,
            channel: 3,
            delta: -7,
        }
    }

    #[test]
    fn parse_timeout_units() {
        assert_eq!(parse_timeout("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_timeout("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_timeout(" 150ms ").unwrap(), Duration::from_millis(150));
    }

    #[test]
    fn parse_timeout_rejects_bad_input() {
        assert_eq!(parse_timeout("").unwrap_err().code, USAGE);
        assert_eq!(parse_timeout("0s").unwrap_err().code, USAGE);
        assert_eq!(parse_timeout("fast").unwrap_err().code, USAGE);
    }

    #[test]
    fn payloads_differ_per_sequence() {
        let plan = plan(1, 1, 300);
        let first = plan.payload(0);
        assert_eq!(first.len(), 300);
        assert_eq!(first[250], 250);
        assert_eq!(first[251], 0);
        assert_ne!(first, plan.payload(1));
    }

    #[test]
    fn inbox_joins_continuation_slices() {
        let data = Memblock::from(b"abcdef".to_vec());
        let mut inbox = Inbox::default();
        for (offset, range) in [(0, 0..2), (2, 2..6)] {
            inbox.push_slice(MemblockSlice {
                channel: 3,
                delta: -7,
                offset,
                chunk: Memchunk::new(data.clone(), range.start, range.len()).unwrap(),
            });
        }
        assert_eq!(inbox.slices, 2);
        assert_eq!(inbox.memblocks.len(), 1);
        assert_eq!(inbox.memblocks[0].data, b"abcdef");
        assert!(inbox.is_complete(&Plan {
            packets: 0,
            memblocks: 1,
            size: 6,
            channel: 3,
            delta: -7,
        }));
    }

    #[test]
    fn memory_exchange_verifies_with_one_byte_io() {
        let mainloop = Mainloop::new();
        let (a, b) = MemoryChannel::pair();
        a.set_max_io(Some(1));
        b.set_max_io(Some(1));
        let plan = plan(3, 2, 40);

        let report = exchange(
            &mainloop,
            a,
            b,
            &plan,
            Duration::from_secs(10),
            "memory",
            Some(1),
        )
        .unwrap();

        assert!(report.verified, "{:?}", report.mismatches);
        assert_eq!(report.packets_received, 3);
        assert_eq!(report.memblocks_received, 2);
        assert_eq!(report.memblock_slices, 80);
        assert_eq!(report.sender.frames_sent, 5);
        assert_eq!(mainloop.live_sources(), 0);
    }

    #[test]
    fn invalid_channel_is_a_usage_error() {
        let mainloop = Mainloop::new();
        let (a, b) = MemoryChannel::pair();
        let plan = Plan {
            channel: 0,
            ..plan(0, 1, 8)
        };
        let err = exchange(&mainloop, a, b, &plan, Duration::from_secs(1), "memory", None)
            .unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn oversized_frames_are_rejected_as_invalid_data() {
        let mainloop = Mainloop::new();
        let (a, b) = MemoryChannel::pair();
        let plan = plan(1, 0, pstream_frame::MAX_FRAME_SIZE + 1);
        let err = exchange(&mainloop, a, b, &plan, Duration::from_secs(1), "memory", None)
            .unwrap_err();
        assert_eq!(err.code, DATA_INVALID);
    }

    #[test]
    fn verify_reports_wrong_tags() {
        let plan = plan(0, 1, 2);
        let inbox = Inbox {
            memblocks: vec![ReceivedBlock {
                channel: 9,
                delta: -7,
                data: plan.payload(1),
            }],
            ..Inbox::default()
        };
        let mismatches = verify(&plan, &inbox);
        assert_eq!(mismatches, vec!["memblock 0: tagged channel 9 delta -7".to_string()]);
    }
}
