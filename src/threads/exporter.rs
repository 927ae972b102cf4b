use bincode::Options;
use log::{debug, error, info};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::mpsc;

use crate::flow::FlowRecord;

/// One aggregation window as handed over by the capture thread.
pub struct Snapshot {
    pub received: u64,
    pub bytes: u64,
    pub parsed: u64,
    pub records: Vec<FlowRecord>,
}

/// Log every window summary and, when a dump path is given, append each
/// record's raw 32-byte image to the file. Runs until the sending side
/// hangs up.
pub fn export(receiver: mpsc::Receiver<Snapshot>, dump: Option<PathBuf>) {
    let mut writer = dump.and_then(|path| match File::create(&path) {
        Ok(file) => Some(BufWriter::new(file)),
        Err(e) => {
            error!("Cannot create dump file {}: {}", path.display(), e);
            None
        }
    });

    while let Ok(snapshot) = receiver.recv() {
        info!(
            "window: {} datagrams / {} bytes received, {} parsed, {} flows",
            snapshot.received,
            snapshot.bytes,
            snapshot.parsed,
            snapshot.records.len()
        );
        for record in &snapshot.records {
            debug!("{}", record);
        }

        let mut dump_failed = false;
        if let Some(w) = writer.as_mut() {
            if let Err(e) = write_records(w, &snapshot.records) {
                error!("Dump write failed, disabling dump: {}", e);
                dump_failed = true;
            }
        }
        if dump_failed {
            writer = None;
        }
    }
    info!("exporter stopped");
}

fn write_records(writer: &mut BufWriter<File>, records: &[FlowRecord]) -> io::Result<()> {
    for record in records {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .with_little_endian()
            .serialize_into(&mut *writer, record)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    }
    writer.flush()
}
