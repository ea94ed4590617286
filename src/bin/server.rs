//! SWTP 서버 (수신자) - Sliding Window Text Protocol
//!
//! 연결마다 태스크 하나를 띄워 핸드쉐이크 후 메시지 하나를 수신한다.
//! - HELLO 검증 후 HELLO-OK(윈도우 범위) 또는 ERR
//! - 누적 ACK, 잘못된 프레임은 폐기
//! - ChaCha20-Poly1305 복호화 지원 (사전 공유 키, 선택)
//!
//! 사용법:
//!   cargo run --release --bin swtp-server -- [OPTIONS]
//!
//! 예시:
//!   # 기본 수신
//!   cargo run --release --bin swtp-server -- --port 5001
//!
//!   # 키 생성 후 암호화 수신
//!   cargo run --release --bin swtp-server -- --gen-key > swtp.key
//!   cargo run --release --bin swtp-server -- --key-file swtp.key --log-file logs/server.log

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, info_span, warn, Instrument};

use swtp::{logging, Config, LineStream, MessageCipher, MessageReceiver, WindowBounds, DEFAULT_PORT};

/// SWTP 서버 - 슬라이딩 윈도우 텍스트 프로토콜 수신자
#[derive(Parser, Debug)]
#[command(name = "swtp-server", version)]
struct Args {
    /// 바인드 호스트
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// 바인드 포트
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// HELLO-OK로 알릴 초기 윈도우
    #[arg(long, default_value_t = 5)]
    win_init: u32,

    #[arg(long, default_value_t = 1)]
    win_min: u32,

    #[arg(long, default_value_t = 5)]
    win_max: u32,

    /// 사전 공유 키 (base64, 32바이트)
    #[arg(long, conflicts_with = "key_file")]
    key: Option<String>,

    /// 사전 공유 키 파일 (base64 한 줄)
    #[arg(long)]
    key_file: Option<PathBuf>,

    /// 새 키를 출력하고 종료
    #[arg(long)]
    gen_key: bool,

    /// 로그 파일 (콘솔과 함께 기록)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

async fn handle_connection(receiver: Arc<MessageReceiver>, socket: TcpStream, peer: SocketAddr) {
    let mut stream = LineStream::with_buffer_size(socket, receiver.config().read_buffer_size);

    match receiver.receive(&mut stream).await {
        Ok(delivery) => {
            info!(
                "Message received ({} bytes): {}",
                delivery.message.len(),
                String::from_utf8_lossy(&delivery.message)
            );
            info!("Stats: {}", delivery.stats.summary());
        }
        Err(e) => warn!("Transfer from {} failed: {}", peer, e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.gen_key {
        println!("{}", MessageCipher::generate_key());
        return Ok(());
    }

    logging::init(args.log_file.as_deref())?;

    let config = Config::new().with_window(WindowBounds::new(args.win_init, args.win_min, args.win_max));
    config.validate()?;

    let mut receiver = MessageReceiver::new(config);
    let cipher = MessageCipher::load(args.key.as_deref(), args.key_file.as_deref())?;
    let encryption = cipher.is_some();
    if let Some(cipher) = cipher {
        receiver = receiver.with_cipher(cipher);
    }
    let receiver = Arc::new(receiver);

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!("SWTP server listening on {}", listener.local_addr()?);
    info!(
        "Window: init={} min={} max={}",
        args.win_init, args.win_min, args.win_max
    );
    info!("Encryption key: {}", if encryption { "configured" } else { "none" });

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Accept failed: {}", e);
                continue;
            }
        };
        info!("Connection from {}", peer);

        let receiver = receiver.clone();
        tokio::spawn(
            handle_connection(receiver, socket, peer).instrument(info_span!("conn", %peer)),
        );
    }
}
