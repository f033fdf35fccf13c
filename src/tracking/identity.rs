//! 会话 ID 与匿名用户 ID 生成

use rand::RngExt;

/// 会话 ID 的随机字节数，hex 编码后为 20 个字符
pub const SESSION_ID_BYTES: usize = 10;

/// 生成随机会话 ID（线程本地 CSPRNG，hex 编码）
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// 生成匿名用户 ID：`a_` + 时间戳 + 7 位随机数
pub fn generate_anonymous_user_id(now: i64) -> String {
    format!("a_{}{}", now, rand::random_range(1_000_000..=9_999_999u32))
}
