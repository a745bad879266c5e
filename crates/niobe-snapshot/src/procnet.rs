//! Socket ownership from `/proc`.
//!
//! A process's descriptor table names sockets only by inode
//! (`/proc/<pid>/fd/N -> socket:[1234]`). The `net/{tcp,tcp6,udp,udp6}`
//! tables map inodes to inet endpoints, so intersecting the two yields the
//! process's network sockets and leaves out Unix-domain and netlink ones.
//!
//! Everything here degrades to `None` where `/proc` is missing or
//! unreadable.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

const TABLES: [(&str, Protocol); 4] = [
    ("tcp", Protocol::Tcp),
    ("tcp6", Protocol::Tcp),
    ("udp", Protocol::Udp),
    ("udp6", Protocol::Udp),
];

/// `st` column value of a listening TCP socket.
const TCP_LISTEN: &str = "0A";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InetSocket {
    pub protocol: Protocol,
    pub local_port: u16,
    pub listening: bool,
    pub inode: u64,
}

/// Parse one `/proc/net/{tcp,udp}[6]` table. Malformed rows and rows without
/// an inode are skipped.
pub(crate) fn parse_table(content: &str, protocol: Protocol) -> Vec<InetSocket> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                return None;
            }
            let (_, port_hex) = fields[1].rsplit_once(':')?;
            let local_port = u16::from_str_radix(port_hex, 16).ok()?;
            let inode: u64 = fields[9].parse().ok()?;
            if inode == 0 {
                return None;
            }
            let listening = match protocol {
                Protocol::Tcp => fields[3] == TCP_LISTEN,
                Protocol::Udp => true,
            };
            Some(InetSocket {
                protocol,
                local_port,
                listening,
                inode,
            })
        })
        .collect()
}

/// Every inet socket in the tables under `net_dir`. `None` when no table
/// could be read.
fn read_tables(net_dir: &Path) -> Option<Vec<InetSocket>> {
    let mut any = false;
    let mut sockets = Vec::new();
    for (name, protocol) in TABLES {
        if let Ok(content) = fs::read_to_string(net_dir.join(name)) {
            any = true;
            sockets.extend(parse_table(&content, protocol));
        }
    }
    any.then_some(sockets)
}

/// Inode of a `socket:[N]` descriptor link.
fn socket_inode(link: &Path) -> Option<u64> {
    link.to_str()?
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Inodes of every socket descriptor `pid` holds, of any family.
pub(crate) fn socket_inodes(pid: u32) -> Option<HashSet<u64>> {
    let entries = fs::read_dir(format!("/proc/{pid}/fd")).ok()?;
    Some(
        entries
            .filter_map(Result::ok)
            .filter_map(|entry| fs::read_link(entry.path()).ok())
            .filter_map(|link| socket_inode(&link))
            .collect(),
    )
}

/// Inodes of the inet sockets `pid` holds.
pub(crate) fn inet_inodes(pid: u32) -> Option<HashSet<u64>> {
    let held = socket_inodes(pid)?;
    let table = read_tables(Path::new(&format!("/proc/{pid}/net")))?;
    Some(
        table
            .into_iter()
            .map(|s| s.inode)
            .filter(|inode| held.contains(inode))
            .collect(),
    )
}

/// Number of TCP and UDP sockets `pid` holds.
pub fn inet_connections(pid: u32) -> Option<u32> {
    inet_inodes(pid).map(|inodes| inodes.len() as u32)
}

/// The process bound to local `port`. Listening TCP sockets win over other
/// matches.
pub fn pid_for_port(port: u16) -> Option<u32> {
    let mut matches: Vec<InetSocket> = read_tables(Path::new("/proc/net"))?
        .into_iter()
        .filter(|s| s.local_port == port)
        .collect();
    if matches.is_empty() {
        return None;
    }
    matches.sort_by_key(|s| !(s.listening && s.protocol == Protocol::Tcp));

    let mut owner = None;
    for entry in fs::read_dir("/proc").ok()?.filter_map(Result::ok) {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let Some(held) = socket_inodes(pid) else {
            continue;
        };
        // Keep scanning for the preferred socket unless this pid owns it.
        if let Some(rank) = matches.iter().position(|s| held.contains(&s.inode)) {
            if rank == 0 {
                return Some(pid);
            }
            owner = owner.or(Some(pid));
        }
    }
    owner
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TCP: &str = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 41234 1 0000000000000000 100 0 0 10 0
   1: 0100007F:A1B2 0100007F:1F90 01 00000000:00000000 00:00000000 00000000  1000        0 41240 1 0000000000000000 20 4 30 10 -1
   2: 0100007F:C000 0100007F:1F90 06 00000000:00000000 03:00001234 00000000     0        0 0 3 0000000000000000
";

    const UDP6: &str = "\
  sl  local_address                         remote_address                        st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode ref pointer drops
  12: 00000000000000000000000000000000:14E9 00000000000000000000000000000000:0000 07 00000000:00000000 00:00000000 00000000   101        0 9911 2 0000000000000000 0
";

    #[test]
    fn parses_tcp_rows_and_skips_inode_zero() {
        let rows = parse_table(TCP, Protocol::Tcp);
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            InetSocket {
                protocol: Protocol::Tcp,
                local_port: 8080,
                listening: true,
                inode: 41234,
            }
        );
        assert!(!rows[1].listening);
        assert_eq!(rows[1].local_port, 0xA1B2);
    }

    #[test]
    fn parses_ipv6_udp_rows() {
        let rows = parse_table(UDP6, Protocol::Udp);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].local_port, 5353);
        assert_eq!(rows[0].inode, 9911);
    }

    #[test]
    fn reads_socket_links() {
        assert_eq!(socket_inode(Path::new("socket:[41234]")), Some(41234));
        assert_eq!(socket_inode(Path::new("pipe:[41234]")), None);
        assert_eq!(socket_inode(Path::new("/var/log/app.log")), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn unix_sockets_are_not_connections() {
        use std::os::fd::AsRawFd;
        use std::os::unix::net::UnixStream;

        let pairs: Vec<_> = (0..5).map(|_| UnixStream::pair().unwrap()).collect();
        let pid = std::process::id();
        let unix: Vec<u64> = pairs
            .iter()
            .flat_map(|(a, b)| [a.as_raw_fd(), b.as_raw_fd()])
            .filter_map(|fd| fs::read_link(format!("/proc/self/fd/{fd}")).ok())
            .filter_map(|link| socket_inode(&link))
            .collect();
        assert_eq!(unix.len(), 10);

        let all = socket_inodes(pid).unwrap();
        let inet = inet_inodes(pid).unwrap();
        assert!(unix.iter().all(|i| all.contains(i)));
        assert!(unix.iter().all(|i| !inet.contains(i)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn tcp_sockets_are_connections() {
        use std::os::fd::AsRawFd;

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let link = fs::read_link(format!("/proc/self/fd/{}", listener.as_raw_fd())).unwrap();
        let inode = socket_inode(&link).unwrap();
        assert!(inet_inodes(std::process::id()).unwrap().contains(&inode));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn listening_port_resolves_to_its_owner() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert_eq!(pid_for_port(port), Some(std::process::id()));
    }

    #[test]
    fn unbound_port_resolves_to_nothing() {
        // Bind then drop so the port is known to be free.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        assert_eq!(pid_for_port(port), None);
    }
}
