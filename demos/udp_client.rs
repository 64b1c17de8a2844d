//! LWM2M Device over UDP
//!
//! Registers a Device object (/3) with a management server, or bootstraps
//! first when the config asks for it, then serves reads, writes, executes
//! and observations until interrupted.
//!
//! Usage:
//!   cargo run --example udp_client -- [--config client.json] [--server 127.0.0.1:5683]
//!
//! Without a config file the endpoint is "demo-device" with NoSec.

use std::io;
use std::net::UdpSocket;
use std::time::{Duration, Instant};

use lwm2m_client::{
    BaseType, ClientConfig, Endpoint, Lwm2mClient, Object, Observer, Operation, RegistrationError,
    RegistrationState, ResourceType, Security, SecurityMode, Transport,
};

struct UdpTransport {
    socket: UdpSocket,
}

impl Transport for UdpTransport {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.socket.send(data).map(|_| ())
    }
}

struct Console;

impl Observer for Console {
    fn bootstrap_done(&mut self, security: &Security) {
        println!("Bootstrap done, management server: {}", security.server_uri);
    }

    fn object_registered(&mut self) {
        println!("Registered");
    }

    fn object_unregistered(&mut self) {
        println!("Unregistered");
    }

    fn registration_updated(&mut self) {
        println!("Registration refreshed");
    }

    fn error(&mut self, error: RegistrationError) {
        println!("Registration error: {}", error);
    }

    fn value_updated(&mut self, path: &str, base_type: BaseType) {
        println!("Server wrote /{} ({:?})", path, base_type);
    }
}

fn device_object() -> lwm2m_client::Result<Object> {
    let mut device = Object::new("3")?;
    device.base_mut().set_observable(true);
    let Some(instance) = device.create_object_instance(0) else {
        return Err(lwm2m_client::Error::InvalidName("3/0".into()));
    };

    instance.create_static_resource("0", ResourceType::String, b"ACME Corp", false);
    instance.create_static_resource("1", ResourceType::String, b"Demo Sensor", false);
    instance.create_static_resource("2", ResourceType::String, b"0001", false);
    if let Some(reboot) = instance.create_dynamic_resource("4", ResourceType::String, false, false)
    {
        reboot.base_mut().set_operation(Operation::POST);
        reboot.set_execute_function(|params| {
            println!("Reboot requested on /{}/{}", params.object_name, params.object_instance_id);
        });
    }
    if let Some(battery) = instance.create_dynamic_resource("9", ResourceType::Integer, true, false)
    {
        battery.set_value_int(100);
    }
    if let Some(time) = instance.create_dynamic_resource("13", ResourceType::Time, true, false) {
        time.base_mut().set_operation(Operation::GET_PUT);
        time.set_value_int(0);
    }
    Ok(device)
}

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1));
    let server = args
        .iter()
        .position(|a| a == "--server")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("127.0.0.1:5683");

    let config = match config_path {
        Some(path) => ClientConfig::from_file(path).expect("Failed to load config"),
        None => ClientConfig {
            endpoint_name: "demo-device".into(),
            server_uri: format!("coap://{}", server),
            security_mode: SecurityMode::NoSec,
            ..Default::default()
        },
    };

    let endpoint: Endpoint = config.endpoint().expect("Invalid endpoint");
    let security = config.security().expect("Invalid security settings");

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_read_timeout(Some(Duration::from_millis(500)))?;
    socket.connect(server)?;
    println!("Endpoint {} talking to {}", endpoint.name(), server);

    let bootstrap = config.bootstrap;
    let mut client = Lwm2mClient::new(
        endpoint,
        (!bootstrap).then_some(security),
        UdpTransport { socket: socket.try_clone()? },
        Console,
    )
    .with_request_timeout(config.request_timeout());
    client
        .add_object(device_object().expect("Failed to build device object"))
        .expect("Failed to add device object");

    let start = Instant::now();
    if bootstrap {
        client.bootstrap(start).expect("Bootstrap request failed");
    } else {
        client.send_register_message(start).expect("Register request failed");
    }

    let mut awaiting_bootstrap = bootstrap;
    let mut buf = [0u8; 1500];
    let mut last_tick = Instant::now();
    loop {
        match socket.recv(&mut buf) {
            Ok(len) => {
                if let Err(e) = client.handle_packet(&buf[..len], Instant::now()) {
                    log::warn!("Dropped datagram: {}", e);
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        // Register once bootstrap has delivered an account
        if awaiting_bootstrap
            && client.registration_state() == RegistrationState::Idle
            && client.security().is_some()
        {
            awaiting_bootstrap = false;
            if let Err(e) = client.send_register_message(now) {
                log::warn!("Register after bootstrap failed: {}", e);
            }
        }

        if now.duration_since(last_tick) >= Duration::from_secs(10) {
            last_tick = now;
            let uptime = now.duration_since(start).as_secs();
            let battery = 100 - (uptime / 60).min(100);
            if let Err(e) = client.set_resource_value("3/0/9", battery.to_string().as_bytes(), now) {
                log::warn!("Battery update failed: {}", e);
            }
        }

        if let Err(e) = client.process(now) {
            log::warn!("Processing failed: {}", e);
        }
    }
}
