use filebeam_core::AppEvent;
use filebeam_core::discovery::ReceiverDevice;

pub fn print_event(event: &AppEvent) {
    match event {
        AppEvent::Status(msg) => println!("{}", msg),
        AppEvent::Error(msg) => eprintln!("Error: {}", msg),
        // 0 marks the end of a session, nothing to draw
        AppEvent::TransferProgress { percent: 0, .. } => {}
        AppEvent::TransferProgress {
            percent,
            is_sending,
        } => {
            let verb = if *is_sending { "Sending" } else { "Receiving" };
            println!("{} {}", verb, progress_bar(*percent));
        }
        AppEvent::TransferCompleted(record) => println!("Done: {}", record),
        AppEvent::TransferCancelled { .. } => println!("Transfer cancelled"),
        AppEvent::DevicesFound(devices) => print_devices(devices),
        AppEvent::ReceiverStarted { addr } => println!("Receiver started on {}", addr),
        AppEvent::ReceiverStopped => println!("Receiver stopped"),
    }
}

pub fn print_devices(devices: &[ReceiverDevice]) {
    if devices.is_empty() {
        println!("No receivers found.");
        return;
    }
    for (idx, device) in devices.iter().enumerate() {
        println!("{:>2}. {}:{}  {}", idx + 1, device.ip_address, device.port, device.name);
    }
}

fn progress_bar(percent: u8) -> String {
    const WIDTH: usize = 30;
    let filled = WIDTH * percent.min(100) as usize / 100;
    format!("[{}{}] {:>3}%", "#".repeat(filled), "-".repeat(WIDTH - filled), percent)
}

/// LAN IPv4 address to show to senders, preferring 192.168.x.x, then 10.x.x.x, then 172.x.x.x
pub fn local_lan_ip() -> Option<String> {
    let ips = local_ip_address::list_afinet_netifas().ok()?;
    let mut best_ip = None;
    for (_name, ip) in ips {
        if ip.is_loopback() || !ip.is_ipv4() {
            continue;
        }
        let ip_str = ip.to_string();
        if ip_str.starts_with("192.168.") {
            return Some(ip_str);
        }
        if ip_str.starts_with("10.") {
            best_ip = Some(ip_str);
            continue;
        }
        if ip_str.starts_with("172.") && best_ip.is_none() {
            best_ip = Some(ip_str);
            continue;
        }
        if best_ip.is_none() {
            best_ip = Some(ip_str);
        }
    }
    best_ip
}
