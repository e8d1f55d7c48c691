use crate::sys::{MrouteSocket, PacketSend};
use crate::{AddrFamily, McAddr};

/// Probes the kernel multicast capabilities and prints a per-feature
/// Ok/Failed report (the `-c` command line mode). Needs root.
pub fn check_kernel(family: AddrFamily) {
    println!("Check kernel features for {}:", family);

    let sock = match family {
        AddrFamily::V4 => MrouteSocket::open_ipv4(),
        AddrFamily::V6 => MrouteSocket::open_ipv6(),
    };
    let sock = match sock {
        Ok(sock) => {
            println!("  raw socket: Ok");
            sock
        }
        Err(err) => {
            println!("  raw socket: Failed ({})", err);
            println!("  (are you running as root?)");
            return;
        }
    };

    match sock.set_mrt(true) {
        Ok(()) => println!("  multicast routing (MRT flag): Ok"),
        Err(err) => println!("  multicast routing (MRT flag): Failed ({})", err),
    }

    // a second socket can only claim the MRT flag of another table
    let table_support = (|| {
        let second = match family {
            AddrFamily::V4 => MrouteSocket::open_ipv4(),
            AddrFamily::V6 => MrouteSocket::open_ipv6(),
        }
        .ok()?;
        second.set_table(1234).ok()?;
        second.set_mrt(true).ok()?;
        let _ = second.set_mrt(false);
        Some(())
    })();
    match table_support {
        Some(()) => println!("  multiple routing tables: Ok"),
        None => println!("  multiple routing tables: Failed"),
    }

    println!("  max groups joined on one socket: {}", probe_max_joins(&sock, family));

    let _ = sock.set_mrt(false);
}

/// Joins ascending multicast groups on the loopback interface until
/// the kernel refuses; the observed maximum bounds how many groups a
/// querier can subscribe.
fn probe_max_joins(sock: &MrouteSocket, family: AddrFamily) -> u32 {
    const LOOPBACK_IF: u32 = 1;
    const PROBE_CAP: u32 = 10000;

    let mut group = match family {
        AddrFamily::V4 => "239.99.0.1".parse::<McAddr>().unwrap(),
        AddrFamily::V6 => "ff15::9900:1".parse::<McAddr>().unwrap(),
    };
    let mut joined = 0;
    while joined < PROBE_CAP {
        if sock.join_group(LOOPBACK_IF, &group).is_err() {
            break;
        }
        joined += 1;
        group = group.incr();
    }
    // leave everything again
    let mut group = match family {
        AddrFamily::V4 => "239.99.0.1".parse::<McAddr>().unwrap(),
        AddrFamily::V6 => "ff15::9900:1".parse::<McAddr>().unwrap(),
    };
    for _ in 0..joined {
        let _ = sock.leave_group(LOOPBACK_IF, &group);
        group = group.incr();
    }
    joined
}
