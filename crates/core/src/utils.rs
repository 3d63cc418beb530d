//! 通用工具函数

/// 生成带前缀的唯一ID
pub fn generate_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}
