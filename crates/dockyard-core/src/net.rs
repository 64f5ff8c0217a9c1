//! Host port allocation.

use std::net::{IpAddr, SocketAddr, TcpListener};

/// Ask the kernel for a free TCP port on `ip`.
///
/// The listener is dropped before returning, so the port is only likely
/// (not guaranteed) to still be free when the container binds it.
pub fn allocate_port(ip: IpAddr) -> std::io::Result<u16> {
    let listener = TcpListener::bind(SocketAddr::new(ip, 0))?;
    Ok(listener.local_addr()?.port())
}
