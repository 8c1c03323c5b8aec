use anyhow::{anyhow, bail, Context, Result};
use chdkptp::config::ChdkConfig;
use chdkptp::types::{CaptureMode, FrameFormat};
use chdkptp::util::{aperture_to_av96, iso_to_sv96, shutter_to_tv96, Distance};
use chdkptp::{ChdkDevice, ExecOptions, ShootOptions};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const USAGE: &str = "Usage: chdkptp-cli [--json] [--device <bus:dev>] [--config <file>] <command> [args]

Commands:
  list                              list CHDK cameras
  exec <code> [--no-wait]           run Lua code on the camera
  ls [path] [--detailed]            list a camera directory
  download <remote> [local]         download a file
  upload <local> [remote]           upload a file
  mkdir <remote>                    create a directory
  rm <remote>...                    delete files or directories
  mode [play|record]                show or switch the camera mode
  shoot [-o <file>] [--no-stream] [--dng] [--tv <seconds>] [--av <f-number>]
        [--iso <iso>] [--distance <e.g. 1.5m>]
  liveview [--format ppm|jpg|png] [--frames <n>] [--out-dir <dir>]";

/// Remove `flag` from `args`, returning whether it was present.
fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    match args.iter().position(|a| a == flag) {
        Some(pos) => {
            args.remove(pos);
            true
        }
        None => false,
    }
}

/// Remove `flag <value>` from `args`, returning the value.
fn take_value(args: &mut Vec<String>, flag: &str) -> Result<Option<String>> {
    match args.iter().position(|a| a == flag) {
        Some(pos) => {
            if pos + 1 >= args.len() {
                bail!("{} needs a value", flag);
            }
            let value = args.remove(pos + 1);
            args.remove(pos);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

struct Globals {
    json: bool,
    device: Option<String>,
}

fn main() -> Result<()> {
    chdkptp::init_logging();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let json = take_flag(&mut args, "--json");
    let device = take_value(&mut args, "--device")?;
    if let Some(path) = take_value(&mut args, "--config")? {
        let config = ChdkConfig::load_layered(&path)
            .with_context(|| format!("Failed to load config from {}", path))?;
        chdkptp::config::set_global(config)?;
    }

    if args.is_empty() {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }
    let command = args.remove(0);
    let globals = Globals { json, device };

    match command.as_str() {
        "list" => cmd_list(&globals),
        "exec" => cmd_exec(&globals, args),
        "ls" => cmd_ls(&globals, args),
        "download" => cmd_download(&globals, args),
        "upload" => cmd_upload(&globals, args),
        "mkdir" => cmd_mkdir(&globals, args),
        "rm" => cmd_rm(&globals, args),
        "mode" => cmd_mode(&globals, args),
        "shoot" => cmd_shoot(&globals, args),
        "liveview" => cmd_liveview(&globals, args),
        _ => {
            eprintln!("Unknown command: {}\n\n{}", command, USAGE);
            std::process::exit(1);
        }
    }
}

fn open_device(globals: &Globals) -> Result<ChdkDevice> {
    let devices = chdkptp::list_devices()?;
    let info = match &globals.device {
        Some(address) => devices
            .into_iter()
            .find(|d| d.address() == *address)
            .ok_or_else(|| anyhow!("No CHDK camera at {}", address))?,
        None => devices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No CHDK camera found"))?,
    };
    Ok(ChdkDevice::open(&info)?)
}

fn cmd_list(globals: &Globals) -> Result<()> {
    let devices = chdkptp::list_devices()?;
    if globals.json {
        println!("{}", serde_json::to_string(&devices)?);
    } else {
        for d in devices {
            println!(
                "{}: {} (CHDK API {}, serial {})",
                d.address(),
                d.model_name,
                d.chdk_api,
                d.serial_num.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

fn cmd_exec(globals: &Globals, mut args: Vec<String>) -> Result<()> {
    let no_wait = take_flag(&mut args, "--no-wait");
    let code = args.first().ok_or_else(|| anyhow!("exec needs Lua code"))?;
    let device = open_device(globals)?;
    let options = if no_wait {
        ExecOptions::no_wait()
    } else {
        ExecOptions::default()
    };

    let value = device.lua_execute(code, &options)?;
    if globals.json {
        println!("{}", serde_json::to_string(&value)?);
    } else if !value.is_nil() {
        println!("{:?}", value);
    }
    for msg in device.messages() {
        let msg = msg?;
        if globals.json {
            println!("{}", serde_json::to_string(&msg)?);
        } else {
            println!("[{:?} {}] {:?}", msg.msg_type, msg.script_id, msg.value);
        }
    }
    Ok(())
}

fn cmd_ls(globals: &Globals, mut args: Vec<String>) -> Result<()> {
    let detailed = take_flag(&mut args, "--detailed");
    let device = open_device(globals)?;
    let path = args
        .first()
        .cloned()
        .unwrap_or_else(|| device.config().transfer.list_directory.clone());

    if detailed {
        let entries = device.list_files_detailed(&path)?;
        if globals.json {
            println!("{}", serde_json::to_string(&entries)?);
        } else {
            for e in entries {
                let kind = if e.is_dir { "d" } else { "-" };
                println!("{} {:>10} {}", kind, e.size.unwrap_or(0), e.path);
            }
        }
    } else {
        let paths = device.list_files(&path)?;
        if globals.json {
            println!("{}", serde_json::to_string(&paths)?);
        } else {
            for p in paths {
                println!("{}", p);
            }
        }
    }
    Ok(())
}

fn cmd_download(globals: &Globals, args: Vec<String>) -> Result<()> {
    let remote = args.first().ok_or_else(|| anyhow!("download needs a remote path"))?;
    let local = match args.get(1) {
        Some(local) => PathBuf::from(local),
        None => PathBuf::from(chdkptp::util::camera_basename(remote)),
    };
    let device = open_device(globals)?;
    device.download_file(remote, Some(&local))?;
    println!("{} -> {}", remote, local.display());
    Ok(())
}

fn cmd_upload(globals: &Globals, args: Vec<String>) -> Result<()> {
    let local = args.first().ok_or_else(|| anyhow!("upload needs a local path"))?;
    let device = open_device(globals)?;
    let remote = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| device.config().transfer.upload_directory.clone());
    let target = device.upload_file(&PathBuf::from(local), &remote, false)?;
    println!("{} -> {}", local, target);
    Ok(())
}

fn cmd_mkdir(globals: &Globals, args: Vec<String>) -> Result<()> {
    let remote = args.first().ok_or_else(|| anyhow!("mkdir needs a remote path"))?;
    open_device(globals)?.mkdir(remote)?;
    Ok(())
}

fn cmd_rm(globals: &Globals, args: Vec<String>) -> Result<()> {
    if args.is_empty() {
        bail!("rm needs at least one remote path");
    }
    open_device(globals)?.delete_files(&args)?;
    Ok(())
}

fn cmd_mode(globals: &Globals, args: Vec<String>) -> Result<()> {
    let device = open_device(globals)?;
    if let Some(mode) = args.first() {
        let mode: CaptureMode = mode.parse()?;
        device.switch_mode(mode)?;
    }
    let mode = device.mode()?;
    if globals.json {
        println!("{}", serde_json::to_string(&mode)?);
    } else {
        println!("{}", mode);
    }
    Ok(())
}

fn cmd_shoot(globals: &Globals, mut args: Vec<String>) -> Result<()> {
    let output = take_value(&mut args, "-o")?;
    let mut options = ShootOptions {
        stream: !take_flag(&mut args, "--no-stream"),
        dng: take_flag(&mut args, "--dng"),
        ..Default::default()
    };
    if let Some(tv) = take_value(&mut args, "--tv")? {
        options.shutter_speed = Some(shutter_to_tv96(tv.parse()?)? as f64);
    }
    if let Some(av) = take_value(&mut args, "--av")? {
        options.aperture = Some(aperture_to_av96(av.parse()?)? as f64);
    }
    if let Some(iso) = take_value(&mut args, "--iso")? {
        options.market_iso = Some(iso_to_sv96(iso.parse()?)? as f64);
    }
    if let Some(distance) = take_value(&mut args, "--distance")? {
        options.distance = Some(distance.parse::<Distance>()?);
    }
    if !options.stream && output.is_some() {
        options.download_after = true;
    }

    let device = open_device(globals)?;
    let data = device.shoot(&options)?;
    match (data, output) {
        (Some(data), Some(path)) => {
            std::fs::write(&path, &data)?;
            println!("Saved {} bytes to {}", data.len(), path);
        }
        (Some(data), None) => {
            let ext = if options.dng { "dng" } else { "jpg" };
            let path = format!("capture_{}.{}", chrono::Utc::now().format("%Y%m%d_%H%M%S"), ext);
            std::fs::write(&path, &data)?;
            println!("Saved {} bytes to {}", data.len(), path);
        }
        (None, _) => println!("Shot saved on the camera"),
    }
    Ok(())
}

fn cmd_liveview(globals: &Globals, mut args: Vec<String>) -> Result<()> {
    let format: FrameFormat = take_value(&mut args, "--format")?
        .as_deref()
        .unwrap_or("jpg")
        .parse()?;
    let limit: Option<u64> = take_value(&mut args, "--frames")?
        .map(|n| n.parse())
        .transpose()?;
    let out_dir = PathBuf::from(take_value(&mut args, "--out-dir")?.unwrap_or_else(|| ".".to_string()));
    std::fs::create_dir_all(&out_dir)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let device = open_device(globals)?;
    for frame in device.frames(format, None) {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let frame = frame?;
        let path = out_dir.join(format!("frame_{:06}.{}", frame.sequence, format.extension()));
        std::fs::write(&path, &frame.data)?;
        if globals.json {
            println!(
                "{}",
                serde_json::json!({
                    "sequence": frame.sequence,
                    "width": frame.width,
                    "height": frame.height,
                    "path": path,
                })
            );
        } else {
            println!("Frame: {}x{} seq:{} -> {}", frame.width, frame.height, frame.sequence, path.display());
        }
        if limit.is_some_and(|n| frame.sequence >= n) {
            break;
        }
    }
    Ok(())
}
