use crate::conf::Configuration;
use crate::err::StartupError;
use crate::proxy::{
    ConfigChange, Mailbox, ProxyInstance, ProxyMsg, Receiver, Sender, Timing, MAILBOX_CAPACITY,
};
use crate::sys::{IfFlags, InterfaceMap, InterfaceRegistry, MrouteSocket, ReversePathFilter};
use crate::AddrFamily;

use log::{info, warn};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Options of the daemon as parsed from the command line.
#[derive(Clone, Debug)]
pub struct ProxyOptions {
    pub config_path: String,
    /// `-r`: disable the reverse path filter on the configured
    /// interfaces (restored on shutdown).
    pub reset_rp_filter: bool,
    /// `-s`: print the instance status periodically.
    pub print_status: bool,
}

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_signal(_: libc::c_int) {
    RUNNING.store(false, Ordering::SeqCst);
}

struct InstanceHandle {
    name: String,
    mailbox: Mailbox,
    thread: thread::JoinHandle<()>,
    sock: Arc<MrouteSocket>,
    bound_ifaces: Vec<(String, u32)>,
}

/// The proxy supervisor: loads the configuration, spawns one proxy
/// instance per definition and coordinates shutdown on
/// SIGINT/SIGTERM.
pub struct Proxy;

impl Proxy {
    /// Runs the daemon until a termination signal arrives.
    pub fn run(options: &ProxyOptions) -> Result<(), StartupError> {
        let cfg = Arc::new(Configuration::load(&options.config_path)?);
        let family = cfg.protocol().family();
        let registry = InterfaceRegistry::from_os()?;
        let multi_instance = cfg.instances().len() > 1;

        let mut rp_filter = if options.reset_rp_filter && family == AddrFamily::V4 {
            Some(ReversePathFilter::new())
        } else {
            None
        };

        let timing = Timing::start();
        let mut handles: Vec<InstanceHandle> = Vec::new();

        let startup = (|| -> Result<(), StartupError> {
            for (idx, inst) in cfg.instances().iter().enumerate() {
                // resolve and vet every configured interface up front
                let mut resolved_up = Vec::new();
                let mut resolved_down = Vec::new();
                for (confs, resolved) in [
                    (&inst.upstreams, &mut resolved_up),
                    (&inst.downstreams, &mut resolved_down),
                ] {
                    for conf in confs.iter() {
                        let info = registry.by_name(&conf.name).ok_or_else(|| {
                            StartupError::Interface {
                                name: conf.name.clone(),
                                reason: "no such interface",
                            }
                        })?;
                        if !info.flags.contains(IfFlags::UP) {
                            return Err(StartupError::Interface {
                                name: conf.name.clone(),
                                reason: "interface is not up",
                            });
                        }
                        if let Some(rp) = rp_filter.as_mut() {
                            rp.disable(&conf.name);
                        }
                        resolved.push((info.if_index, Arc::new(conf.clone())));
                    }
                }

                let table = inst
                    .table_number
                    .or_else(|| resolved_up.first().map(|(i, _)| *i))
                    .unwrap_or(idx as u32 + 1);

                let sock = Arc::new(match family {
                    AddrFamily::V4 => MrouteSocket::open_ipv4()?,
                    AddrFamily::V6 => MrouteSocket::open_ipv6()?,
                });
                if multi_instance {
                    sock.set_table(table)?;
                }
                sock.set_mrt(true)?;
                sock.set_receive_timeout(Duration::from_millis(100))?;

                let mut bound_ifaces = Vec::new();
                if multi_instance {
                    for (if_index, conf) in resolved_up.iter().chain(resolved_down.iter()) {
                        if let Err(err) = sock.bind_iface_to_table(&conf.name, table) {
                            warn!("cannot bind {} to table {}: {}", conf.name, table, err);
                        } else {
                            bound_ifaces.push((conf.name.clone(), *if_index));
                        }
                    }
                }

                let mailbox = Mailbox::new(MAILBOX_CAPACITY);
                let sender = Arc::new(Sender::new(cfg.protocol(), sock.clone()));
                let ifmap = Arc::new(Mutex::new(InterfaceMap::new(family)));

                let mut instance = ProxyInstance::new(
                    &inst.name,
                    cfg.protocol(),
                    cfg.clone(),
                    mailbox.clone(),
                    timing.clone(),
                    sender,
                    sock.clone(),
                    ifmap.clone(),
                );
                instance.attach_receiver(Receiver::spawn(
                    family,
                    sock.clone(),
                    mailbox.clone(),
                    ifmap,
                ));

                // topology and disciplines arrive as config messages
                for (if_index, conf) in resolved_up {
                    mailbox.send(ProxyMsg::Config(ConfigChange::AddUpstream {
                        if_index,
                        conf,
                    }));
                }
                for (if_index, conf) in resolved_down {
                    mailbox.send(ProxyMsg::Config(ConfigChange::AddDownstream {
                        if_index,
                        conf,
                    }));
                }
                for binding in [&inst.upstream_input_rule, &inst.upstream_output_rule]
                    .into_iter()
                    .flatten()
                {
                    mailbox.send(ProxyMsg::Config(ConfigChange::SetGlobalBinding(
                        binding.clone(),
                    )));
                }
                mailbox.send(ProxyMsg::Init);

                let thread = thread::Builder::new()
                    .name(format!("pinstance-{}", inst.name))
                    .spawn(move || instance.run())
                    .expect("failed to spawn an instance thread");

                info!("started proxy instance '{}' (table {})", inst.name, table);
                handles.push(InstanceHandle {
                    name: inst.name.clone(),
                    mailbox,
                    thread,
                    sock,
                    bound_ifaces,
                });
            }
            Ok(())
        })();

        if let Err(err) = startup {
            Proxy::shutdown(handles, &timing);
            return Err(err);
        }

        install_signal_handlers();

        let mut status_countdown = 0u32;
        while RUNNING.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(500));
            if options.print_status {
                status_countdown += 1;
                if status_countdown >= 10 {
                    status_countdown = 0;
                    for handle in &handles {
                        handle.mailbox.send(ProxyMsg::Debug);
                    }
                }
            }
        }

        info!("shutting down");
        Proxy::shutdown(handles, &timing);
        drop(rp_filter); // restores the touched rp_filter entries
        Ok(())
    }

    fn shutdown(handles: Vec<InstanceHandle>, timing: &Timing) {
        for handle in handles {
            handle.mailbox.send(ProxyMsg::Exit);
            if handle.thread.join().is_err() {
                warn!("instance '{}' panicked", handle.name);
            }
            for (name, _) in &handle.bound_ifaces {
                if let Err(err) = handle.sock.unbind_iface_from_table(name) {
                    warn!("cannot unbind {}: {}", name, err);
                }
            }
            let _ = handle.sock.set_mrt(false);
        }
        timing.stop();
    }
}

fn install_signal_handlers() {
    let handler = handle_signal as extern "C" fn(libc::c_int);
    // SAFETY: handle_signal only touches an atomic flag
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }
}
