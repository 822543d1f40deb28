use std::io::{self, Read, Write};

use fat32::time::DateTime;
use fat32::{FsError, MountOptions, Result, Volume, VolumeInfo};
use fat_api_types::fs::{FileStat, FsResult};

// ─── Command dispatch ──────────────────────────────────────────────────────────

const CHUNK: usize = 64 * 1024;

type Disk = Volume<std::fs::File>;

/// Mounts `image`, runs one command and unmounts. Returns the result code the process
/// exits with.
pub fn run(image: &str, options: MountOptions, args: &[String]) -> FsResult {
    let mut volume = match Volume::open_image(image, options) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("fat_fs: cannot mount {image}: {e}");
            return FsResult::from(&e);
        }
    };

    let result = dispatch(&mut volume, args);
    let unmounted = volume.unmount().map(drop);
    match result.and(unmounted) {
        Ok(()) => FsResult::Ok,
        Err(e) => {
            eprintln!("fat_fs: {e}");
            FsResult::from(&e)
        }
    }
}

fn dispatch(volume: &mut Disk, args: &[String]) -> Result<()> {
    let (command, rest) = args.split_first().ok_or(FsError::InvalidArgument("missing command"))?;
    let arg = |i: usize| {
        rest.get(i)
            .map(String::as_str)
            .ok_or(FsError::InvalidArgument("missing argument"))
    };
    let number = |s: &str| s.parse::<u64>().map_err(|_| FsError::InvalidArgument("not a number"));

    match command.as_str() {
        "info"     => print_info(&volume.info()),
        "ls"       => list(volume, rest.first().map_or("/", String::as_str)),
        "stat"     => print_stat(arg(0)?, &volume.getattr(arg(0)?)?),
        "cat"      => cat(volume, arg(0)?),
        "write"    => write(volume, arg(0)?, rest.get(1).map(|s| number(s.as_str())).transpose()?.unwrap_or(0)),
        "touch"    => touch(volume, arg(0)?),
        "mkdir"    => volume.mkdir(arg(0)?).map(drop),
        "rm"       => volume.unlink(arg(0)?),
        "rmdir"    => volume.rmdir(arg(0)?),
        "truncate" => volume.truncate(arg(0)?, number(arg(1)?)?),
        _          => Err(FsError::InvalidArgument("unknown command")),
    }
}

// ─── Commands ──────────────────────────────────────────────────────────────────

fn print_info(info: &VolumeInfo) -> Result<()> {
    let mut out = io::stdout().lock();
    writeln!(out, "label         {}", info.label)?;
    writeln!(out, "oem           {}", info.oem_name)?;
    writeln!(out, "type          {}", info.fs_type)?;
    writeln!(out, "volume id     {:08X}", info.volume_id)?;
    writeln!(out, "sector size   {}", info.bytes_per_sector)?;
    writeln!(out, "cluster size  {}", info.bytes_per_cluster)?;
    writeln!(out, "clusters      {} ({} free)", info.data_clusters, info.free_clusters)?;
    writeln!(out, "root cluster  {}", info.root_cluster)?;
    Ok(())
}

fn list(volume: &mut Disk, path: &str) -> Result<()> {
    let dir = volume.opendir(path)?;
    let entries = volume.readdir(dir);
    volume.releasedir(dir);

    let mut out = io::stdout().lock();
    for e in entries? {
        let kind = if e.is_dir { 'd' } else { '-' };
        writeln!(out, "{kind} {:>10}  {}", e.size, e.name)?;
    }
    Ok(())
}

fn stamp(secs: i64) -> String {
    let t = DateTime::from_unix(secs);
    format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", t.year, t.month, t.day, t.hour, t.minute, t.second)
}

fn print_stat(path: &str, st: &FileStat) -> Result<()> {
    let mut out = io::stdout().lock();
    writeln!(out, "path      {path}")?;
    writeln!(out, "type      {}", if st.is_dir() { "directory" } else { "file" })?;
    writeln!(out, "mode      {:o}", st.mode)?;
    writeln!(out, "size      {}", st.size)?;
    writeln!(out, "blocks    {} of {} bytes", st.blocks, st.block_size)?;
    writeln!(out, "accessed  {}", stamp(st.atime))?;
    writeln!(out, "modified  {}", stamp(st.mtime))?;
    writeln!(out, "created   {}", stamp(st.ctime))?;
    Ok(())
}

fn cat(volume: &mut Disk, path: &str) -> Result<()> {
    let file = volume.open(path)?;
    let result = copy_to_stdout(volume, file);
    volume.release(file);
    result
}

fn copy_to_stdout(volume: &mut Disk, file: fat32::NodeId) -> Result<()> {
    let mut out = io::stdout().lock();
    let mut buf = vec![0u8; CHUNK];
    let mut offset = 0u64;
    loop {
        let n = volume.read(file, &mut buf, offset)?;
        if n == 0 { break; }
        out.write_all(&buf[..n])?;
        offset += n as u64;
    }
    out.flush()?;
    Ok(())
}

fn write(volume: &mut Disk, path: &str, offset: u64) -> Result<()> {
    let mut data = Vec::new();
    io::stdin().lock().read_to_end(&mut data)?;

    let file = match volume.open(path) {
        Err(FsError::NotFound) => {
            volume.mknod(path)?;
            volume.open(path)?
        }
        other => other?,
    };

    let mut done = 0;
    let result = loop {
        if done == data.len() { break Ok(()); }
        match volume.write(file, &data[done..], offset + done as u64) {
            Ok(0) => break Err(FsError::NoSpace),
            Ok(n) => done += n,
            Err(e) => break Err(e),
        }
    };
    volume.release(file);
    result
}

fn touch(volume: &mut Disk, path: &str) -> Result<()> {
    match volume.getattr(path) {
        Ok(_) => {
            let now = DateTime::now().to_unix();
            volume.utime(path, now, now)
        }
        Err(FsError::NotFound) => volume.mknod(path).map(drop),
        Err(e) => Err(e),
    }
}
