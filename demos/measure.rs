use log::info;
use pcm_monitor::{Config, Monitor};

fn fibonacci(n: u32) -> u64 {
    match n {
        0 => 1,
        1 => 1,
        _ => fibonacci(n - 1) + fibonacci(n - 2),
    }
}

fn main() -> pcm_monitor::Result<()> {
    env_logger::init();

    if !pcm_monitor::is_available() {
        eprintln!("perf events are not available on this machine");
        return Ok(());
    }

    let mut monitor = Monitor::new(Config::from_env())?;
    print!("{}", monitor.system_info());

    for run in 0..2 {
        monitor.start_measurement()?;

        // Workload
        info!("Starting workload. Run {}.", run);
        let buf = vec![run as u8; 256 << 20];
        let sum: u64 = buf.iter().map(|b| *b as u64).sum::<u64>() + fibonacci(30);

        let elapsed = monitor.stop_measurement()?;
        println!("Run {} ({:.3} sec, checksum {})", run, elapsed.as_secs_f64(), sum);

        for core in 0..monitor.topology().num_cores() {
            let c = monitor.core_counters(core)?;
            if c.cycles == 0 {
                continue;
            }
            println!(
                "  core {:3}: {:>14} cycles, IPC {:.2}{}, {:.2} GHz, L3 hit {:.1}%",
                core,
                c.cycles,
                c.ipc,
                if c.valid_ipc { "" } else { " (invalid)" },
                c.frequency_ghz,
                c.l3_cache_hit_ratio * 100.0
            );
        }
        for socket in 0..monitor.topology().num_sockets() {
            let mem = monitor.memory_counters(socket)?;
            let io = monitor.io_counters(socket)?;
            println!(
                "  socket {}: DRAM {:.1} MiB/s read, {:.1} MiB/s write, PCIe{} {:.1} MiB/s",
                socket,
                mem.memory_controller_read_bw_mbps,
                mem.memory_controller_write_bw_mbps,
                if io.pcie_is_estimated { " (est.)" } else { "" },
                io.pcie_read_bandwidth_mbps + io.pcie_write_bandwidth_mbps
            );
        }
        let sys = monitor.system_counters()?;
        println!(
            "  system: {} cores, IPC {:.2}, {:.1} J package, {:.1} J DRAM, throttle {:.1}%",
            sys.active_cores,
            sys.total_ipc,
            sys.package_energy_joules,
            sys.dram_energy_joules,
            sys.thermal_throttle_ratio * 100.0
        );
    }

    match monitor.instant_pcie_bytes(0) {
        Ok(pcie) => println!(
            "Socket 0 PCIe over {:?}: {} B read, {} B written",
            monitor.config().pcie_sample_window,
            pcie.read_bytes,
            pcie.write_bytes
        ),
        Err(e) => println!("PCIe sampling unavailable - {}", e),
    }
    Ok(())
}
