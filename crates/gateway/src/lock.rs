//! Role-exclusive single instance lock.
//!
//! Each role owns one lock file under a well-known directory
//! (`/var/lock/virtualgw-<role>.lock` by default). The file is held with a
//! non-blocking exclusive `flock(2)` for the whole process lifetime, so a
//! master and a side instance never contend, while a second instance of the
//! same role fails immediately.

use crate::types::Role;
use common::{Error, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default directory of the lock files
pub const DEFAULT_LOCK_DIR: &str = "/var/lock";

/// Attempts made when the lock file is contended or replaced under us
const ACQUIRE_RETRIES: u32 = 5;

/// Pause between attempts while another process holds the lock
///
/// A pre-clean only holds it for the time of one unlink, so contention that
/// outlasts every pause comes from a running instance.
const CONTENTION_PAUSE: Duration = Duration::from_millis(20);

/// Factory for role lock handles rooted at one directory
#[derive(Debug, Clone)]
pub struct RoleLock {
    dir: PathBuf,
}

impl RoleLock {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the lock file for `role`
    pub fn path(&self, role: Role) -> PathBuf {
        self.dir.join(format!("virtualgw-{}.lock", role))
    }

    /// Remove lock files of both roles that nobody holds
    ///
    /// Best-effort: failures are logged and skipped. Returns the removed paths.
    pub fn clean_stale(&self) -> Vec<PathBuf> {
        let mut removed = Vec::new();

        for role in Role::ALL {
            let path = self.path(role);
            let file = match OpenOptions::new().read(true).write(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot inspect lock file");
                    continue;
                }
            };

            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(_probe) => match fs::remove_file(&path) {
                    Ok(()) => {
                        info!(%role, path = %path.display(), "Removed stale lock file");
                        removed.push(path);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to remove stale lock file")
                    }
                },
                Err((_, Errno::EWOULDBLOCK)) => {
                    debug!(%role, path = %path.display(), "Lock file in use, leaving it");
                }
                Err((_, errno)) => {
                    warn!(path = %path.display(), error = %errno, "Cannot probe lock file");
                }
            }
        }

        removed
    }

    /// Take the lock for `role` without waiting
    ///
    /// Fails with [`Error::AlreadyLocked`] if another process keeps holding
    /// it. Brief contention from a concurrent [`RoleLock::clean_stale`] is
    /// waited out.
    pub fn acquire(&self, role: Role) -> Result<RoleLockHandle> {
        let path = self.path(role);
        let mut contended = false;

        for _ in 0..ACQUIRE_RETRIES {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .mode(0o644)
                .open(&path)?;

            let lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(lock) => lock,
                Err((file, Errno::EWOULDBLOCK)) => {
                    contended = true;
                    // An unlinked file means a pre-clean had it; reopen right away
                    if still_linked(&file, &path) {
                        debug!(path = %path.display(), "Role lock busy, retrying");
                        thread::sleep(CONTENTION_PAUSE);
                    }
                    continue;
                }
                Err((_, errno)) => {
                    return Err(Error::lock(format!("flock {}: {}", path.display(), errno)));
                }
            };

            // A concurrent pre-clean may have unlinked the file we opened
            if !still_linked(&lock, &path) {
                debug!(path = %path.display(), "Lock file replaced while locking, retrying");
                contended = false;
                continue;
            }

            let mut file: &File = &lock;
            file.set_len(0)?;
            writeln!(file, "{}", std::process::id())?;

            info!(%role, path = %path.display(), "Acquired role lock");
            return Ok(RoleLockHandle {
                role,
                path,
                lock: Some(lock),
            });
        }

        if contended {
            return Err(Error::AlreadyLocked(path.display().to_string()));
        }
        Err(Error::lock(format!(
            "lock file {} kept changing",
            path.display()
        )))
    }
}

fn still_linked(file: &File, path: &Path) -> bool {
    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

/// An exclusively held role lock; released on drop
pub struct RoleLockHandle {
    role: Role,
    path: PathBuf,
    lock: Option<Flock<File>>,
}

impl RoleLockHandle {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.lock.is_some()
    }

    /// Remove the lock file and unlock. Calling it again is a no-op.
    pub fn release(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };

        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove lock file");
        }

        if let Err((_, errno)) = lock.unlock() {
            warn!(path = %self.path.display(), error = %errno, "Failed to unlock");
        }

        info!(role = %self.role, path = %self.path.display(), "Released role lock");
    }
}

impl fmt::Debug for RoleLockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleLockHandle")
            .field("role", &self.role)
            .field("path", &self.path)
            .field("held", &self.is_held())
            .finish()
    }
}

impl Drop for RoleLockHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    #[test]
    fn test_lock_paths_per_role() {
        let locks = RoleLock::new("/var/lock");
        assert_eq!(
            locks.path(Role::Master),
            PathBuf::from("/var/lock/virtualgw-master.lock")
        );
        assert_eq!(
            locks.path(Role::Side),
            PathBuf::from("/var/lock/virtualgw-side.lock")
        );
    }

    #[test]
    fn test_same_role_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let locks = RoleLock::new(dir.path());

        let _held = locks.acquire(Role::Master).unwrap();
        let err = locks.acquire(Role::Master).unwrap_err();
        assert!(err.is_already_locked());
    }

    #[test]
    fn test_roles_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let locks = RoleLock::new(dir.path());

        let master = locks.acquire(Role::Master).unwrap();
        let side = locks.acquire(Role::Side).unwrap();
        assert!(master.is_held());
        assert!(side.is_held());
    }

    #[test]
    fn test_concurrent_acquire_exactly_one_wins() {
        let dir = tempfile::tempdir().unwrap();
        let locks = RoleLock::new(dir.path());
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let locks = locks.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    locks.acquire(Role::Master)
                })
            })
            .collect();

        // Keep winners alive until both threads are done
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let won = results.iter().filter(|r| r.is_ok()).count();
        let refused = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_already_locked()))
            .count();

        assert_eq!(won, 1);
        assert_eq!(refused, 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let locks = RoleLock::new(dir.path());

        let mut handle = locks.acquire(Role::Side).unwrap();
        let path = handle.path().to_path_buf();
        assert!(path.exists());

        handle.release();
        assert!(!handle.is_held());
        assert!(!path.exists());
        handle.release();

        // Lock is available again
        assert!(locks.acquire(Role::Side).is_ok());
    }

    #[test]
    fn test_drop_releases() {
        let dir = tempfile::tempdir().unwrap();
        let locks = RoleLock::new(dir.path());

        {
            let _handle = locks.acquire(Role::Master).unwrap();
        }
        assert!(locks.acquire(Role::Master).is_ok());
    }

    #[test]
    fn test_clean_stale_removes_only_unheld() {
        let dir = tempfile::tempdir().unwrap();
        let locks = RoleLock::new(dir.path());

        // Leftover from a crashed side instance
        fs::write(locks.path(Role::Side), "4242\n").unwrap();
        let held = locks.acquire(Role::Master).unwrap();

        let removed = locks.clean_stale();
        assert_eq!(removed, vec![locks.path(Role::Side)]);
        assert!(held.path().exists());
        assert!(held.is_held());
    }

    #[test]
    fn test_acquire_waits_out_concurrent_clean() {
        let dir = tempfile::tempdir().unwrap();
        let locks = RoleLock::new(dir.path());
        let path = locks.path(Role::Side);
        fs::write(&path, "4242\n").unwrap();

        // Another role's pre-clean holding the stale side lock
        let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let cleaner = Flock::lock(file, FlockArg::LockExclusiveNonblock).unwrap();
        let stale = path.clone();
        let cleaning = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            fs::remove_file(&stale).unwrap();
            drop(cleaner);
        });

        let acquired = locks.acquire(Role::Side);
        cleaning.join().unwrap();

        let handle = acquired.unwrap();
        assert!(handle.is_held());
        assert_eq!(handle.role(), Role::Side);
        assert!(path.exists());
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_unreleased_holder_still_refuses() {
        let dir = tempfile::tempdir().unwrap();
        let locks = RoleLock::new(dir.path());
        let path = locks.path(Role::Side);
        fs::write(&path, "4242\n").unwrap();

        let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let _holder = Flock::lock(file, FlockArg::LockExclusiveNonblock).unwrap();

        let err = locks.acquire(Role::Side).unwrap_err();
        assert!(err.is_already_locked());
        assert_eq!(fs::read_to_string(&path).unwrap(), "4242\n");
    }

    #[test]
    fn test_pid_written() {
        let dir = tempfile::tempdir().unwrap();
        let locks = RoleLock::new(dir.path());

        let handle = locks.acquire(Role::Master).unwrap();
        let contents = fs::read_to_string(handle.path()).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }
}
