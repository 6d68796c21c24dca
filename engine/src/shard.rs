use std::net::IpAddr;

/// Computes the stable, direction-symmetric shard index for a packet
/// (spec.md §4.2): `(fold(min(src,dst)) + l4_protocol + max(src_port,
/// dst_port)) mod num_workers`.
///
/// Fixes the two open questions spec.md §9 raises about the source:
/// - The IPv6 fold uses the true `(hi, lo)` halves of the numerically
///   smaller address, not the source's `min[1] = min[0]` duplication bug.
/// - `INITIAL_THREAD_HASH` is dropped rather than left dangling unused.
pub fn shard_index(src: IpAddr, dst: IpAddr, l4_protocol: u8, src_port: u16, dst_port: u16, num_workers: usize) -> usize {
    debug_assert!(num_workers > 0);

    let folded = match (src, dst) {
        (IpAddr::V4(s), IpAddr::V4(d)) => {
            let s = u32::from(s) as u64;
            let d = u32::from(d) as u64;
            s.min(d)
        }
        (IpAddr::V6(s), IpAddr::V6(d)) => {
            let smaller = if u128::from(s) <= u128::from(d) { s } else { d };
            let octets = smaller.octets();
            let hi = u64::from_be_bytes(octets[0..8].try_into().unwrap());
            let lo = u64::from_be_bytes(octets[8..16].try_into().unwrap());
            hi.wrapping_add(lo)
        }
        // Mixed families never occur: src/dst come from the same parsed
        // packet and always share an L3 type.
        _ => 0,
    };

    let max_port = src_port.max(dst_port) as u64;
    let sum = folded
        .wrapping_add(l4_protocol as u64)
        .wrapping_add(max_port);
    (sum % num_workers as u64) as usize
}
