//! tcptx 시뮬레이터
//!
//! 손실이 있는 가상 링크 위에서 송신자와 수신자를 끝까지 돌린다.
//! - 고정 지연 (RTT/2 편도), 데이터 세그먼트 무작위 손실
//! - ACK의 SACK 옵션은 실제 와이어 포맷으로 인코딩/디코딩
//! - 4 RTT 동안 진전이 없으면 재전송 타임아웃
//!
//! 사용법:
//!   cargo run --release --bin tcptx-sim -- [OPTIONS]
//!
//! 예시:
//!   # 1MB, 2% 손실, RTT 50ms
//!   cargo run --release --bin tcptx-sim -- --bytes 1048576 --loss 0.02 --rtt 50
//!
//!   # SACK 없이 (Reno)
//!   RUST_LOG=debug cargo run --bin tcptx-sim -- --reno --loss 0.05

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use tcptx::{
    Clock, CongestionAlgorithm, Config, ManualClock, Receiver, SackOption, SeqNum, Segment, Sender,
};

/// 가상 시간 상한
const MAX_VIRTUAL_TIME: Duration = Duration::from_secs(3600);

/// 시뮬레이션 설정
struct SimConfig {
    bytes: usize,
    loss: f64,
    rtt: Duration,
    seed: u64,
    config: Config,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            bytes: 1024 * 1024, // 1MB
            loss: 0.01,
            rtt: Duration::from_millis(40),
            seed: 1,
            config: Config::default(),
        }
    }
}

fn parse_args() -> Result<SimConfig, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut sim = SimConfig::default();

    let value = |i: usize| -> Result<&str, Box<dyn std::error::Error>> {
        args.get(i + 1)
            .map(String::as_str)
            .ok_or_else(|| format!("{} 뒤에 값이 필요함", args[i]).into())
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bytes" | "-n" => {
                sim.bytes = value(i)?.parse()?;
                i += 1;
            }
            "--loss" | "-l" => {
                sim.loss = value(i)?.parse()?;
                i += 1;
            }
            "--rtt" => {
                sim.rtt = Duration::from_millis(value(i)?.parse()?);
                i += 1;
            }
            "--seed" | "-s" => {
                sim.seed = value(i)?.parse()?;
                i += 1;
            }
            "--segment-size" => {
                sim.config.segment_size = value(i)?.parse()?;
                i += 1;
            }
            "--reno" => {
                sim.config.sack_enabled = false;
            }
            "--westwood" => {
                sim.config.congestion = CongestionAlgorithm::Westwood;
            }
            "--help" | "-h" => {
                println!(
                    r#"tcptx-sim - 손실 링크 위의 TCP 송신 시뮬레이션

사용법:
  cargo run --release --bin tcptx-sim -- [OPTIONS]

옵션:
  -n, --bytes <N>         전송할 바이트 (기본: 1048576)
  -l, --loss <P>          데이터 세그먼트 손실 확률 0.0~1.0 (기본: 0.01)
  --rtt <MS>              왕복 지연 밀리초 (기본: 40)
  -s, --seed <S>          난수 시드 (기본: 1)
  --segment-size <SIZE>   SMSS 바이트 (기본: 536)
  --reno                  SACK 끄기 (중복 ACK 기반 복구)
  --westwood              Westwood+ 혼잡 제어
  -h, --help              이 도움말 출력

로그 수준은 RUST_LOG로 조절 (예: RUST_LOG=tcptx=debug)
"#
                );
                std::process::exit(0);
            }
            other => warn!("알 수 없는 옵션 무시: {}", other),
        }
        i += 1;
    }

    if !(0.0..1.0).contains(&sim.loss) {
        return Err(format!("손실 확률은 0 이상 1 미만이어야 함: {}", sim.loss).into());
    }
    sim.config.validate()?;
    Ok(sim)
}

/// 링크 위의 ACK
struct AckPacket {
    ack: SeqNum,
    option: Option<Bytes>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let sim = parse_args()?;
    let mut rng = StdRng::seed_from_u64(sim.seed);

    info!("tcptx simulation starting...");
    info!("Bytes: {}", sim.bytes);
    info!("Loss: {:.2}%", sim.loss * 100.0);
    info!("RTT: {:?}", sim.rtt);
    info!("SMSS: {} bytes", sim.config.segment_size);

    let mut data = vec![0u8; sim.bytes];
    rng.fill_bytes(&mut data);
    let data = Bytes::from(data);

    let clock = ManualClock::default();
    let start = clock.now();
    let isn = SeqNum(rng.gen());

    let mut sender = Sender::with_clock(sim.config.clone(), isn, Arc::new(clock.clone()))?;
    let mut receiver = Receiver::new(isn);
    info!(
        "Congestion control: {}, SACK: {}",
        sender.algorithm(),
        sim.config.sack_enabled
    );

    let one_way = sim.rtt / 2;
    let rto = sim.rtt * 4;

    let mut to_receiver: VecDeque<(Instant, Segment)> = VecDeque::new();
    let mut to_sender: VecDeque<(Instant, AckPacket)> = VecDeque::new();
    let mut queued = 0usize;
    let mut dropped = 0u64;
    let mut last_progress = start;
    let mut last_una = isn;
    let report_step = (sim.bytes / 10).max(1);
    let mut next_report = report_step;

    loop {
        // 버퍼가 허락하는 만큼 애플리케이션 데이터 공급
        let room = sender.buffer().available() as usize;
        if queued < data.len() && room > 0 {
            let end = (queued + room).min(data.len());
            sender.send(data.slice(queued..end))?;
            queued = end;
        }

        if queued == data.len() && sender.is_idle() {
            break;
        }

        let now = clock.now();
        while let Some(segment) = sender.poll_transmit() {
            if rng.gen_bool(sim.loss) {
                dropped += 1;
                debug!("drop [{};{}]", segment.seq, segment.end_seq());
                continue;
            }
            to_receiver.push_back((now + one_way, segment));
        }

        // 다음 이벤트 시각
        let deadline = last_progress + rto;
        let next = [
            to_receiver.front().map(|(t, _)| *t),
            to_sender.front().map(|(t, _)| *t),
            Some(deadline),
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(deadline);

        if next > now {
            clock.advance(next - now);
        }
        let now = clock.now();
        if now - start > MAX_VIRTUAL_TIME {
            return Err(format!("가상 시간 {:?} 안에 전송이 끝나지 않음", MAX_VIRTUAL_TIME).into());
        }

        while to_receiver.front().map_or(false, |(t, _)| *t <= now) {
            if let Some((_, segment)) = to_receiver.pop_front() {
                let info = receiver.on_segment(segment.seq, segment.payload);
                let option = if info.sack.is_empty() {
                    None
                } else {
                    Some(SackOption::new(info.sack).to_bytes()?)
                };
                to_sender.push_back((
                    now + one_way,
                    AckPacket {
                        ack: info.ack,
                        option,
                    },
                ));
            }
        }

        while to_sender.front().map_or(false, |(t, _)| *t <= now) {
            if let Some((_, packet)) = to_sender.pop_front() {
                let blocks = match &packet.option {
                    Some(bytes) => SackOption::from_bytes(bytes)?.blocks,
                    None => Vec::new(),
                };
                sender.on_ack(packet.ack, &blocks);
            }
        }

        let una = sender.buffer().head_sequence();
        if una != last_una {
            last_una = una;
            last_progress = now;
        } else if now >= deadline && !sender.is_idle() {
            sender.on_retransmission_timeout();
            last_progress = now;
        }

        if receiver.delivered_len() >= next_report {
            info!(
                "Progress: {:.1}% cwnd={} ssthresh={} state={}",
                receiver.delivered_len() as f64 / sim.bytes.max(1) as f64 * 100.0,
                sender.cwnd(),
                sender.ssthresh(),
                sender.state()
            );
            next_report += report_step;
        }
    }

    let elapsed = clock.now() - start;
    if receiver.delivered() != data {
        return Err("수신 데이터가 보낸 데이터와 다름".into());
    }

    let throughput = sim.bytes as f64 / elapsed.as_secs_f64().max(1e-9) / 1_000_000.0;
    info!("Transfer complete!");
    info!("  Virtual time: {:.3}s", elapsed.as_secs_f64());
    info!("  Throughput: {:.2} MB/s", throughput);
    info!("  Dropped segments: {}", dropped);
    info!("  Duplicate bytes at receiver: {}", receiver.duplicate_bytes());
    info!("  SRTT: {:?}", sender.srtt());
    info!("  Final cwnd: {} ({} segments)", sender.cwnd(), sender.congestion_state().cwnd_segments());
    info!("  {}", sender.stats().summary());

    Ok(())
}
