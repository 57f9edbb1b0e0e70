use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};

/// Maximum socket path length (`sockaddr_un.sun_path`).
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

/// Session sockets carry the owner's terminal and command I/O, so nobody
/// else gets a byte.
const SOCKET_MODE: u32 = 0o600;

/// The listening end of a session socket.
///
/// Binding never goes straight to the requested path. The socket is
/// created under a pid-suffixed staging name, locked down to
/// [`SOCKET_MODE`] while nothing can reach it, and then renamed into
/// place, which also displaces whatever a dead host left behind in one
/// step. Before any of that, a probe connection decides whether the path
/// is actually dead: a socket file that still answers belongs to a live
/// host and is never touched.
pub struct SessionSocket {
    listener: UnixListener,
    path: PathBuf,
    identity: (u64, u64),
}

/// What currently sits at a bind path.
enum Occupancy {
    /// Nothing there.
    Free,
    /// A socket file nobody answers on.
    Stale,
    /// A host is serving on it right now.
    Live,
    /// Something that is not a socket.
    NotASocket,
}

impl SessionSocket {
    /// Bind and listen on a filesystem-path session socket.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        check_path_len(&path)?;

        match probe(&path) {
            Occupancy::Free => {}
            Occupancy::Stale => debug!(?path, "displacing socket left by a dead host"),
            Occupancy::Live => return Err(TransportError::InUse { path }),
            Occupancy::NotASocket => return Err(TransportError::NotASocket { path }),
        }

        let staging = staging_name(&path);
        check_path_len(&staging)?;
        let listener = UnixListener::bind(&staging).map_err(|source| TransportError::Bind {
            path: path.clone(),
            source,
        })?;
        if let Err(source) = harden_and_move(&staging, &path) {
            let _ = std::fs::remove_file(&staging);
            return Err(TransportError::Bind { path, source });
        }

        let meta = std::fs::symlink_metadata(&path).map_err(|source| TransportError::Bind {
            path: path.clone(),
            source,
        })?;
        info!(?path, "listening for sessions");
        Ok(Self {
            listener,
            identity: (meta.dev(), meta.ino()),
            path,
        })
    }

    /// Accept one session connection (blocking).
    pub fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!("accepted session connection");
        Ok(stream)
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The path still holds the inode this listener created.
    fn still_ours(&self) -> bool {
        std::fs::symlink_metadata(&self.path).is_ok_and(|meta| {
            meta.file_type().is_socket() && (meta.dev(), meta.ino()) == self.identity
        })
    }
}

impl Drop for SessionSocket {
    fn drop(&mut self) {
        if self.still_ours() {
            debug!(path = ?self.path, "removing session socket");
            let _ = std::fs::remove_file(&self.path);
        } else {
            warn!(path = ?self.path, "session socket was replaced, leaving it");
        }
    }
}

/// Connect to a hosted session (blocking).
pub fn connect(path: impl AsRef<Path>) -> Result<UnixStream> {
    let path = path.as_ref();
    let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(?path, "connected to session socket");
    Ok(stream)
}

fn probe(path: &Path) -> Occupancy {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return Occupancy::Free;
    };
    if !meta.file_type().is_socket() {
        return Occupancy::NotASocket;
    }
    // A socket file alone proves nothing; only a listener answering on it
    // does. The probe shows up at a live host as a client that vanishes
    // before the hello, which its accept loop tolerates.
    match UnixStream::connect(path) {
        Ok(_) => Occupancy::Live,
        Err(_) => Occupancy::Stale,
    }
}

fn staging_name(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{}", std::process::id()));
    PathBuf::from(name)
}

fn harden_and_move(staging: &Path, path: &Path) -> std::io::Result<()> {
    std::fs::set_permissions(staging, std::fs::Permissions::from_mode(SOCKET_MODE))?;
    std::fs::rename(staging, path)
}

fn check_path_len(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len >= MAX_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len,
            max: MAX_PATH_LEN,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("chanmux-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn serves_a_connection_both_ways() {
        let dir = temp_dir("uds-serve");
        let sock_path = dir.join("session.sock");
        let listener = SessionSocket::bind(&sock_path).unwrap();

        let path_clone = sock_path.clone();
        let client = std::thread::spawn(move || {
            let mut stream = connect(&path_clone).unwrap();
            stream.write_all(b"ping").unwrap();
            let mut reply = [0u8; 4];
            stream.read_exact(&mut reply).unwrap();
            reply
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        server.write_all(b"pong").unwrap();

        assert_eq!(&client.join().unwrap(), b"pong");
        drop(listener);
        assert!(!sock_path.exists(), "socket removed when the host leaves");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn rejects_overlong_path() {
        let long_path = "/tmp/".to_string() + &"c".repeat(200) + ".sock";
        let result = SessionSocket::bind(&long_path);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn socket_appears_private_with_no_staging_leftover() {
        let dir = temp_dir("uds-private");
        let sock_path = dir.join("private.sock");

        let listener = SessionSocket::bind(&sock_path).unwrap();
        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert!(
            !staging_name(&sock_path).exists(),
            "staging name must not survive a successful bind"
        );

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn refuses_to_displace_a_live_host() {
        let dir = temp_dir("uds-live");
        let sock_path = dir.join("live.sock");
        let first = SessionSocket::bind(&sock_path).unwrap();

        let second = SessionSocket::bind(&sock_path);
        assert!(matches!(second, Err(TransportError::InUse { .. })));

        // The probe must not have stolen or unlinked the first host's
        // socket; new clients still get through.
        assert!(connect(&sock_path).is_ok());

        drop(first);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn reclaims_socket_of_a_dead_host() {
        let dir = temp_dir("uds-dead");
        let sock_path = dir.join("dead.sock");

        // A bare listener leaves its socket file behind on drop, exactly
        // like a host that died without cleanup.
        drop(UnixListener::bind(&sock_path).unwrap());
        assert!(sock_path.exists());

        let listener = SessionSocket::bind(&sock_path).unwrap();
        assert!(connect(&sock_path).is_ok());

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn refuses_non_socket_file() {
        let dir = temp_dir("uds-nonsock");
        let sock_path = dir.join("regular.sock");
        std::fs::write(&sock_path, b"not a socket").unwrap();

        let result = SessionSocket::bind(&sock_path);
        assert!(matches!(result, Err(TransportError::NotASocket { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn drop_only_removes_its_own_inode() {
        let dir = temp_dir("uds-replaced");
        let sock_path = dir.join("replaced.sock");
        let listener = SessionSocket::bind(&sock_path).unwrap();

        std::fs::remove_file(&sock_path).unwrap();
        std::fs::write(&sock_path, b"replacement").unwrap();

        drop(listener);
        assert!(sock_path.exists(), "unrelated file must survive drop");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
