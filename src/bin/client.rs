//! SWTP 클라이언트 (송신자) - Sliding Window Text Protocol
//!
//! 서버에 연결해 세션 파라미터를 제안하고 메시지 하나를 전송한다.
//! - 4바이트 DATA 프레임 + 누적 ACK
//! - 결정적 손실/변조 주입으로 재전송 과정 재현
//! - ChaCha20-Poly1305 암호화 지원 (사전 공유 키, 선택)
//!
//! 사용법:
//!   cargo run --release --bin swtp-client -- [OPTIONS]
//!
//! 예시:
//!   # 기본 전송
//!   cargo run --release --bin swtp-client -- --msg HelloWorldFromRTPy!
//!
//!   # 손실(3n) + 변조(2n+1) 주입, GROUP ACK
//!   cargo run --release --bin swtp-client -- --lossy --ack-mode GROUP
//!
//!   # 암호화 전송
//!   cargo run --release --bin swtp-client -- --crypto --key-file swtp.key

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use tokio::net::TcpStream;
use tracing::{info, info_span, warn, Instrument};

use swtp::message::parse_err;
use swtp::transport::Incoming;
use swtp::{
    logging, AckMode, ChecksumAlgorithm, FaultConfig, LineStream, MessageCipher, MessageSender,
    Mode, SessionParams, DEFAULT_PORT,
};

/// SWTP 클라이언트 - 슬라이딩 윈도우 텍스트 프로토콜 송신자
#[derive(Parser, Debug)]
#[command(name = "swtp-client", version)]
struct Args {
    /// 서버 호스트
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// 서버 포트
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// 전송 모드 (GBN | SR)
    #[arg(long, default_value = "GBN")]
    modo: Mode,

    /// 협상할 max_msg_len (서버는 30 미만을 거부)
    #[arg(short = 'm', long, default_value_t = 64)]
    max_msg_len: u32,

    /// 체크섬 (CRC16 | Adler32 | CRC)
    #[arg(long, default_value = "CRC16")]
    checksum: ChecksumAlgorithm,

    /// 재전송 타임아웃 (ms)
    #[arg(long, default_value_t = 300)]
    timeout_ms: u64,

    /// ACK 방식 (INDIVIDUAL | GROUP)
    #[arg(long, default_value = "INDIVIDUAL")]
    ack_mode: AckMode,

    /// 보낼 메시지
    #[arg(long, default_value = "HelloWorldFromRTPy!")]
    msg: String,

    /// 암호화 (crypto=ON)
    #[arg(long)]
    crypto: bool,

    /// 사전 공유 키 (base64, 32바이트)
    #[arg(long, conflicts_with = "key_file")]
    key: Option<String>,

    /// 사전 공유 키 파일
    #[arg(long)]
    key_file: Option<PathBuf>,

    /// seq % loss_every == loss_offset 이면 첫 전송을 버림 (0 = 비활성)
    #[arg(long, default_value_t = 0)]
    loss_every: u32,

    #[arg(long, default_value_t = 0)]
    loss_offset: u32,

    /// seq % corrupt_every == corrupt_offset 이면 첫 전송을 변조 (0 = 비활성)
    #[arg(long, default_value_t = 0)]
    corrupt_every: u32,

    #[arg(long, default_value_t = 0)]
    corrupt_offset: u32,

    /// 손실 3/0 + 변조 2/1 데모 설정
    #[arg(long, conflicts_with_all = ["loss_every", "corrupt_every"])]
    lossy: bool,

    /// 로그 파일 (콘솔과 함께 기록)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn params(&self) -> SessionParams {
        SessionParams {
            mode: self.modo,
            max_msg_len: self.max_msg_len,
            checksum: self.checksum,
            timeout_ms: self.timeout_ms,
            ack_mode: self.ack_mode,
            crypto: self.crypto.then_some(true),
        }
    }

    fn faults(&self) -> FaultConfig {
        if self.lossy {
            return FaultConfig::lossy();
        }
        FaultConfig::none()
            .with_loss(self.loss_every, self.loss_offset)
            .with_corruption(self.corrupt_every, self.corrupt_offset)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logging::init(args.log_file.as_deref())?;

    let params = args.params();
    let faults = args.faults();

    let mut sender = MessageSender::new(params).with_faults(faults);
    if let Some(cipher) = MessageCipher::load(args.key.as_deref(), args.key_file.as_deref())? {
        sender = sender.with_cipher(cipher);
    }

    info!("SWTP client connecting to {}:{}", args.host, args.port);
    info!("Session: {}", params.to_hello_line());
    if faults.is_active() {
        info!("Fault injection: {:?}", faults);
    }

    let socket = TcpStream::connect((args.host.as_str(), args.port)).await?;
    let peer = socket.peer_addr()?;
    let mut stream = LineStream::new(socket);

    let span = info_span!("conn", %peer);
    let stats = sender
        .send(&mut stream, args.msg.as_bytes())
        .instrument(span.clone())
        .await?;
    info!("Transfer complete: {}", stats.summary());

    // 서버가 복호화 등에 실패하면 완료 뒤에 ERR이 올 수 있다
    stream.shutdown().await?;
    let deadline = Instant::now() + params.timeout();
    loop {
        match stream.recv_batch(Some(deadline)).await? {
            Incoming::Lines(lines) => {
                for reason in lines.iter().filter_map(|line| parse_err(line)) {
                    warn!(parent: &span, "Server reported error: {}", reason);
                }
            }
            Incoming::TimedOut | Incoming::Closed => break,
        }
    }

    Ok(())
}
