use crate::err::SysError;
use crate::{AddrFamily, McAddr};

use bitflags::bitflags;
use log::debug;

use std::collections::BTreeMap;
use std::ffi::CStr;

/// Largest number of IPv4 virtual interfaces the kernel MFIB accepts.
pub const MAX_VIFS: u16 = 32;

/// Largest number of IPv6 multicast interfaces.
pub const MAX_MIFS: u16 = 64;

bitflags! {
    /// Interface flags as reported by the kernel (`SIOCGIFFLAGS`).
    pub struct IfFlags: u32 {
        const UP           = libc::IFF_UP as u32;
        const BROADCAST    = libc::IFF_BROADCAST as u32;
        const LOOPBACK     = libc::IFF_LOOPBACK as u32;
        const POINTOPOINT  = libc::IFF_POINTOPOINT as u32;
        const RUNNING      = libc::IFF_RUNNING as u32;
        const MULTICAST    = libc::IFF_MULTICAST as u32;
        const ALLMULTI     = libc::IFF_ALLMULTI as u32;
    }
}

/// What the registry knows about one network interface.
#[derive(Clone, Debug)]
pub struct IfaceInfo {
    pub if_index: u32,
    pub name: String,
    pub flags: IfFlags,
    pub v4_addrs: Vec<McAddr>,
    pub v6_addrs: Vec<McAddr>,
}

/// Enumeration of the OS network interfaces: index/name translation,
/// flags and per-family addresses.
///
/// In production it is filled from `getifaddrs(3)`; tests construct it
/// with synthetic entries.
#[derive(Debug, Default)]
pub struct InterfaceRegistry {
    by_index: BTreeMap<u32, IfaceInfo>,
}

impl InterfaceRegistry {
    /// An empty registry (use [`InterfaceRegistry::refresh`] or
    /// [`InterfaceRegistry::insert`] to fill it).
    pub fn new() -> InterfaceRegistry {
        InterfaceRegistry::default()
    }

    /// Reads the current interface list from the OS.
    pub fn from_os() -> Result<InterfaceRegistry, SysError> {
        let mut registry = InterfaceRegistry::new();
        registry.refresh()?;
        Ok(registry)
    }

    /// Re-reads the interface list via `getifaddrs`.
    pub fn refresh(&mut self) -> Result<(), SysError> {
        self.by_index.clear();

        let mut ifap: *mut libc::ifaddrs = std::ptr::null_mut();
        // SAFETY: getifaddrs fills the pointer on success; the list is
        // released with freeifaddrs below.
        if unsafe { libc::getifaddrs(&mut ifap) } != 0 {
            return Err(SysError::last("getifaddrs"));
        }

        let mut cur = ifap;
        while !cur.is_null() {
            // SAFETY: cur walks the linked list returned by getifaddrs
            let entry = unsafe { &*cur };
            cur = entry.ifa_next;

            let name = unsafe { CStr::from_ptr(entry.ifa_name) }
                .to_string_lossy()
                .into_owned();
            let if_index = unsafe { libc::if_nametoindex(entry.ifa_name) };
            if if_index == 0 {
                continue;
            }

            let info = self.by_index.entry(if_index).or_insert_with(|| IfaceInfo {
                if_index,
                name: name.clone(),
                flags: IfFlags::from_bits_truncate(entry.ifa_flags),
                v4_addrs: Vec::new(),
                v6_addrs: Vec::new(),
            });

            if entry.ifa_addr.is_null() {
                continue;
            }
            // SAFETY: ifa_addr points at a sockaddr whose family field
            // selects the concrete type
            let family = unsafe { (*entry.ifa_addr).sa_family };
            match i32::from(family) {
                libc::AF_INET => {
                    let sa = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in) };
                    info.v4_addrs
                        .push(McAddr::V4(sa.sin_addr.s_addr.to_ne_bytes()));
                }
                libc::AF_INET6 => {
                    let sa = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in6) };
                    info.v6_addrs.push(McAddr::V6(sa.sin6_addr.s6_addr));
                }
                _ => {}
            }
        }

        // SAFETY: ifap came from getifaddrs
        unsafe { libc::freeifaddrs(ifap) };
        debug!("interface registry: {} interfaces", self.by_index.len());
        Ok(())
    }

    /// Adds a synthetic interface (tests).
    pub fn insert(&mut self, info: IfaceInfo) {
        self.by_index.insert(info.if_index, info);
    }

    pub fn by_index(&self, if_index: u32) -> Option<&IfaceInfo> {
        self.by_index.get(&if_index)
    }

    pub fn by_name(&self, name: &str) -> Option<&IfaceInfo> {
        self.by_index.values().find(|i| i.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IfaceInfo> {
        self.by_index.values()
    }
}

/// The per-instance bijection between OS interface indices and the
/// virtual interface indices of the kernel routing table, plus the
/// interface names the rule evaluator matches on.
#[derive(Debug)]
pub struct InterfaceMap {
    family: AddrFamily,
    names: BTreeMap<u32, String>,
    vif_by_if: BTreeMap<u32, u16>,
    if_by_vif: BTreeMap<u16, u32>,
}

impl InterfaceMap {
    pub fn new(family: AddrFamily) -> InterfaceMap {
        InterfaceMap {
            family,
            names: BTreeMap::new(),
            vif_by_if: BTreeMap::new(),
            if_by_vif: BTreeMap::new(),
        }
    }

    fn max_vifs(&self) -> u16 {
        match self.family {
            AddrFamily::V4 => MAX_VIFS,
            AddrFamily::V6 => MAX_MIFS,
        }
    }

    /// Registers an interface, allocating the lowest free virtual
    /// index.
    pub fn add(&mut self, if_index: u32, name: &str) -> Result<u16, SysError> {
        if let Some(vif) = self.vif_by_if.get(&if_index) {
            return Ok(*vif);
        }
        let vif = (0..self.max_vifs())
            .find(|v| !self.if_by_vif.contains_key(v))
            .ok_or_else(|| {
                SysError::new(
                    "vif allocation",
                    std::io::Error::from_raw_os_error(libc::ENOSPC),
                )
            })?;
        self.names.insert(if_index, name.to_string());
        self.vif_by_if.insert(if_index, vif);
        self.if_by_vif.insert(vif, if_index);
        Ok(vif)
    }

    /// Releases an interface and its virtual index.
    pub fn remove(&mut self, if_index: u32) -> Option<u16> {
        self.names.remove(&if_index);
        let vif = self.vif_by_if.remove(&if_index)?;
        self.if_by_vif.remove(&vif);
        Some(vif)
    }

    pub fn name(&self, if_index: u32) -> Option<&str> {
        self.names.get(&if_index).map(|s| s.as_str())
    }

    pub fn vif(&self, if_index: u32) -> Option<u16> {
        self.vif_by_if.get(&if_index).copied()
    }

    pub fn if_index_of_vif(&self, vif: u16) -> Option<u32> {
        self.if_by_vif.get(&vif).copied()
    }

    pub fn if_indexes(&self) -> Vec<u32> {
        self.vif_by_if.keys().copied().collect()
    }
}
