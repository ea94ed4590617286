//! 암호화 모듈 - 사전 공유 키 + ChaCha20-Poly1305 대칭 암호화
//!
//! 흐름:
//! 1. 양측이 같은 32바이트 키(base64)를 설정
//! 2. 송신측이 분할 전에 메시지 전체를 암호화
//! 3. 수신측이 재조립 후 복호화
//!
//! 암호문 토큰은 base64(nonce ‖ ciphertext)이므로 줄 단위 프로토콜로 그대로 보낼 수 있다.

use std::fmt;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand_core::{OsRng, RngCore};

/// 키 크기 (32 bytes)
pub const KEY_SIZE: usize = 32;

/// ChaCha20-Poly1305 nonce 크기 (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// ChaCha20-Poly1305 태그 크기 (16 bytes)
pub const TAG_SIZE: usize = 16;

/// 암호화 오류
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("잘못된 키: {0}")]
    InvalidKey(String),
    #[error("키 파일 읽기 실패: {0}")]
    KeyFile(#[from] std::io::Error),
    #[error("암호화 실패: {0}")]
    EncryptionFailed(String),
    #[error("복호화 실패: {0}")]
    DecryptionFailed(String),
}

/// 메시지 암호화기
pub struct MessageCipher {
    cipher: ChaCha20Poly1305,
}

impl MessageCipher {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// base64 키로 생성
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let raw = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let key: [u8; KEY_SIZE] = raw
            .try_into()
            .map_err(|raw: Vec<u8>| CryptoError::InvalidKey(format!("{}바이트 (32바이트 필요)", raw.len())))?;
        Ok(Self::new(&key))
    }

    /// 키 파일(base64 한 줄)로 생성
    pub fn from_key_file(path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_base64(&contents)
    }

    /// CLI 입력으로 생성 (`--key`가 `--key-file`보다 우선, 둘 다 없으면 None)
    pub fn load(key: Option<&str>, key_file: Option<&Path>) -> Result<Option<Self>, CryptoError> {
        match (key, key_file) {
            (Some(key), _) => Self::from_base64(key).map(Some),
            (None, Some(path)) => Self::from_key_file(path).map(Some),
            (None, None) => Ok(None),
        }
    }

    /// 새 키 생성 (base64)
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        STANDARD.encode(key)
    }

    /// 메시지 암호화
    /// 반환: base64(nonce(12) + ciphertext(원본 + 16바이트 태그))
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed).into_bytes())
    }

    /// 메시지 복호화
    /// 입력: encrypt가 만든 base64 토큰
    pub fn decrypt(&self, token: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let sealed = STANDARD
            .decode(token)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::DecryptionFailed("데이터가 너무 짧음".into()));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}

impl fmt::Debug for MessageCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageCipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_encrypt_decrypt() {
        let key = MessageCipher::generate_key();
        let alice = MessageCipher::from_base64(&key).unwrap();
        let bob = MessageCipher::from_base64(&key).unwrap();

        let plaintext = b"HelloWorldFromRTPy!";
        let token = alice.encrypt(plaintext).unwrap();

        assert!(token.iter().all(|b| b.is_ascii() && *b != b'\n' && *b != b'|'));
        assert_eq!(bob.decrypt(&token).unwrap(), plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let alice = MessageCipher::from_base64(&MessageCipher::generate_key()).unwrap();
        let mallory = MessageCipher::from_base64(&MessageCipher::generate_key()).unwrap();

        let token = alice.encrypt(b"secret").unwrap();
        assert!(matches!(
            mallory.decrypt(&token),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_truncated_token() {
        let cipher = MessageCipher::new(&[7u8; KEY_SIZE]);
        let token = STANDARD.encode([0u8; 10]);
        assert!(cipher.decrypt(token.as_bytes()).is_err());
        assert!(cipher.decrypt(b"not base64 !!").is_err());
    }

    #[test]
    fn test_invalid_key_length() {
        let short = STANDARD.encode([1u8; 16]);
        assert!(matches!(
            MessageCipher::from_base64(&short),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_load_without_key() {
        assert!(MessageCipher::load(None, None).unwrap().is_none());
        assert!(MessageCipher::load(Some("!!"), None).is_err());
        let missing = Path::new("/nonexistent/swtp.key");
        assert!(matches!(
            MessageCipher::load(None, Some(missing)),
            Err(CryptoError::KeyFile(_))
        ));
    }

    #[test]
    fn test_key_file() {
        let key = MessageCipher::generate_key();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", key).unwrap();

        let from_file = MessageCipher::from_key_file(file.path()).unwrap();
        let direct = MessageCipher::from_base64(&key).unwrap();
        let token = direct.encrypt(b"abc").unwrap();
        assert_eq!(from_file.decrypt(&token).unwrap(), b"abc");
    }
}
