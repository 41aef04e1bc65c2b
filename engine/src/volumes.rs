//! Destination volumes and free-space queries.

use std::io;
use std::path::Path;

use crate::error::EngineError;
use crate::model::VolumeInfo;

/// Source of free-space figures for a destination mount point.
///
/// The default implementation asks the operating system; tests and embedders
/// can substitute their own.
pub trait SpaceProbe: Send + Sync {
    /// Bytes available to an unprivileged writer on the volume holding `mount_point`.
    fn available_bytes(&self, mount_point: &Path) -> io::Result<u64>;
}

/// `SpaceProbe` backed by `statvfs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpaceProbe;

impl SpaceProbe for SystemSpaceProbe {
    fn available_bytes(&self, mount_point: &Path) -> io::Result<u64> {
        sys::space(mount_point).map(|(_, avail)| avail)
    }
}

/// `SpaceProbe` that always reports the same figure.
#[derive(Debug, Clone, Copy)]
pub struct FixedSpaceProbe(pub u64);

impl SpaceProbe for FixedSpaceProbe {
    fn available_bytes(&self, _mount_point: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}

/// Enumerate mounted volumes usable as destinations.
pub fn list_volumes() -> Result<Vec<VolumeInfo>, EngineError> {
    sys::list_volumes()
}

#[cfg(unix)]
mod sys {
    use super::*;

    /// (total, available) bytes of the filesystem holding `path`.
    pub fn space(path: &Path) -> io::Result<(u64, u64)> {
        let stat = rustix::fs::statvfs(path)?;
        let frsize = if stat.f_frsize > 0 { stat.f_frsize } else { stat.f_bsize };
        Ok((
            stat.f_blocks.saturating_mul(frsize),
            stat.f_bavail.saturating_mul(frsize),
        ))
    }

    #[cfg(target_os = "linux")]
    pub fn list_volumes() -> Result<Vec<VolumeInfo>, EngineError> {
        let table = std::fs::read_to_string("/proc/self/mounts").map_err(EngineError::VolumeTable)?;
        Ok(parse_mounts(&table)
            .into_iter()
            .filter_map(|mount| {
                let (total_bytes, avail_bytes) = match space(Path::new(&mount.mount_point)) {
                    Ok(figures) => figures,
                    Err(e) => {
                        log::debug!("skipping {}: {}", mount.mount_point, e);
                        return None;
                    }
                };
                if total_bytes == 0 {
                    return None;
                }
                Some(VolumeInfo {
                    name: volume_name(&mount.mount_point),
                    removable: removable(&mount.device),
                    mount_point: mount.mount_point.into(),
                    fs_type: Some(mount.fs_type),
                    total_bytes,
                    avail_bytes,
                })
            })
            .collect())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn list_volumes() -> Result<Vec<VolumeInfo>, EngineError> {
        let (total_bytes, avail_bytes) = space(Path::new("/")).map_err(EngineError::VolumeTable)?;
        Ok(vec![VolumeInfo {
            name: "/".to_string(),
            mount_point: "/".into(),
            fs_type: None,
            total_bytes,
            avail_bytes,
            removable: None,
        }])
    }

    #[cfg(target_os = "linux")]
    fn removable(device: &str) -> Option<bool> {
        let name = device.strip_prefix("/dev/")?;
        // sdb1 -> sdb, nvme0n1p2 -> nvme0n1, mmcblk0p1 -> mmcblk0
        let base = if name.starts_with("nvme") || name.starts_with("mmcblk") {
            name.rsplit_once('p').map_or(name, |(head, _)| head)
        } else {
            name.trim_end_matches(|c: char| c.is_ascii_digit())
        };
        let flag = std::fs::read_to_string(format!("/sys/block/{base}/removable")).ok()?;
        Some(flag.trim() == "1")
    }
}

#[cfg(not(unix))]
mod sys {
    use super::*;

    pub fn space(_path: &Path) -> io::Result<(u64, u64)> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "free-space query is not supported on this platform",
        ))
    }

    pub fn list_volumes() -> Result<Vec<VolumeInfo>, EngineError> {
        Err(EngineError::Unsupported("volume listing"))
    }
}

/// Filesystems that never make sense as a transfer destination.
const PSEUDO_FILESYSTEMS: &[&str] = &[
    "proc", "sysfs", "devtmpfs", "devpts", "tmpfs", "cgroup", "cgroup2", "securityfs",
    "pstore", "debugfs", "tracefs", "configfs", "fusectl", "mqueue", "hugetlbfs", "bpf",
    "autofs", "binfmt_misc", "rpc_pipefs", "nsfs", "overlay", "squashfs", "ramfs", "efivarfs",
    "selinuxfs",
];

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
#[derive(Debug, Clone, PartialEq, Eq)]
struct MountLine {
    device: String,
    mount_point: String,
    fs_type: String,
}

/// Parse a `/proc/mounts` style table, dropping pseudo filesystems.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_mounts(table: &str) -> Vec<MountLine> {
    table
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let device = parts.next()?;
            let mount_point = parts.next()?;
            let fs_type = parts.next()?;
            if PSEUDO_FILESYSTEMS.contains(&fs_type) || mount_point.starts_with("/snap/") {
                return None;
            }
            Some(MountLine {
                device: device.to_string(),
                mount_point: unescape_mount(mount_point),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
/// Undo the octal escaping the kernel applies to spaces, tabs and newlines.
fn unescape_mount(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn volume_name(mount_point: &str) -> String {
    Path::new(mount_point)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| mount_point.to_string())
}
