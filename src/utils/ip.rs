//! IP 地址处理工具
//!
//! 提供统一的客户端 IP 提取功能，支持：
//! - 可信代理配置（trusted_proxies）
//! - CIDR 匹配
//! - 私有 IP 自动检测

use std::net::{IpAddr, SocketAddr};

use actix_web::HttpRequest;
use actix_web::dev::ConnectionInfo;
use tracing::debug;

/// 检查 IP 是否为私有地址或 localhost
pub fn is_private_or_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || (v6.segments()[0] & 0xfe00) == 0xfc00 // fc00::/7
                || (v6.segments()[0] & 0xffc0) == 0xfe80 // fe80::/10
        }
    }
}

fn parse_ip(ip: &str) -> Option<IpAddr> {
    // 先尝试解析为 SocketAddr（支持 ip:port），如果失败再尝试纯 IpAddr
    ip.parse::<SocketAddr>()
        .map(|s| s.ip())
        .or_else(|_| ip.parse::<IpAddr>())
        .ok()
}

/// 检查 IP 是否在可信代理列表中
pub fn is_trusted_proxy(ip: &str, trusted_proxies: &[String]) -> bool {
    let Some(ip_addr) = parse_ip(ip) else {
        return false;
    };

    trusted_proxies.iter().any(|proxy| {
        if proxy.contains('/') {
            ip_in_cidr(&ip_addr, proxy)
        } else {
            proxy.parse::<IpAddr>().is_ok_and(|p| p == ip_addr)
        }
    })
}

/// CIDR 检查
pub fn ip_in_cidr(ip: &IpAddr, cidr: &str) -> bool {
    let Some((network, prefix_len)) = cidr.split_once('/') else {
        return false;
    };

    let Ok(prefix_len): Result<u8, _> = prefix_len.parse() else {
        return false;
    };

    let Ok(network_addr) = network.parse::<IpAddr>() else {
        return false;
    };

    match (ip, network_addr) {
        (IpAddr::V4(ip), IpAddr::V4(net)) => {
            if prefix_len > 32 {
                return false;
            }
            let mask = u32::MAX.checked_shl(32 - prefix_len as u32).unwrap_or(0);
            let ip_bits = u32::from_be_bytes(ip.octets());
            let net_bits = u32::from_be_bytes(net.octets());
            (ip_bits & mask) == (net_bits & mask)
        }
        (IpAddr::V6(ip), IpAddr::V6(net)) => {
            if prefix_len > 128 {
                return false;
            }
            let mask = u128::MAX.checked_shl(128 - prefix_len as u32).unwrap_or(0);
            let ip_bits = u128::from_be_bytes(ip.octets());
            let net_bits = u128::from_be_bytes(net.octets());
            (ip_bits & mask) == (net_bits & mask)
        }
        _ => false,
    }
}

/// 从 ConnectionInfo 提取真实客户端 IP
///
/// 策略（按优先级）：
/// 1. 显式配置 trusted_proxies 且匹配 → 使用 X-Forwarded-For
/// 2. 未配置 trusted_proxies 且连接来自私有 IP → 自动检测代理，使用 X-Forwarded-For
/// 3. 默认 → 使用连接 IP（防止伪造）
pub fn extract_client_ip_from_conn_info<F>(
    conn_info: &ConnectionInfo,
    trusted_proxies: &[String],
    get_forwarded_ip: F,
) -> Option<String>
where
    F: FnOnce() -> Option<String>,
{
    let peer_ip = conn_info.peer_addr()?;
    let peer_ip = parse_ip(peer_ip)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| peer_ip.to_string());

    if !trusted_proxies.is_empty() {
        if is_trusted_proxy(&peer_ip, trusted_proxies) {
            let real_ip = get_forwarded_ip().unwrap_or_else(|| peer_ip.clone());
            debug!("Trusted proxy (explicit): {} -> {}", peer_ip, real_ip);
            return Some(real_ip);
        }
        return Some(peer_ip);
    }

    if let Ok(ip_addr) = peer_ip.parse::<IpAddr>()
        && is_private_or_local(&ip_addr)
        && let Some(real_ip) = get_forwarded_ip()
    {
        debug!(
            "Auto-detect proxy (private IP {}): using X-Forwarded-For: {}",
            peer_ip, real_ip
        );
        return Some(real_ip);
    }

    Some(peer_ip)
}

/// 从 HttpRequest 提取真实客户端 IP
pub fn extract_client_ip(req: &HttpRequest, trusted_proxies: &[String]) -> Option<String> {
    extract_client_ip_from_conn_info(&req.connection_info(), trusted_proxies, || {
        extract_forwarded_ip_from_headers(req.headers())
    })
}

/// 从 HeaderMap 提取转发的 IP（X-Forwarded-For 或 X-Real-IP）
pub fn extract_forwarded_ip_from_headers(
    headers: &actix_web::http::header::HeaderMap,
) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}
