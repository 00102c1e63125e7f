use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::thread::{spawn, JoinHandle};
use std::time::Duration;

use medicom_ul::association::client::ClientAssociationOptions;
use medicom_ul::association::server::ServerAssociationOptions;
use medicom_ul::dimse::{
    status, Connection, DimseContext, DimseHandler, DimseOptions, Disposition, Outcome,
};
use medicom_ul::pdu::{read_pdu, AbortRQSource, Pdu, MAXIMUM_PDU_SIZE};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync + 'static>>;

static SCU_AE_TITLE: &str = "ROGUE-SCU";
static SCP_AE_TITLE: &str = "ROGUE-SCP";

static IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
static VERIFICATION_SOP_CLASS: &str = "1.2.840.10008.1.1";

/// Counts every message which reaches the handler.
#[derive(Default)]
struct MessageSpy {
    messages: usize,
    timed_out: bool,
}

impl DimseHandler<TcpStream> for MessageSpy {
    fn on_c_echo_rq(
        &mut self,
        ctx: &DimseContext<'_, TcpStream>,
        pcid: u8,
        message_id: u16,
        affected_class: String,
    ) -> medicom_ul::dimse::Result<Disposition> {
        self.messages += 1;
        ctx.sender()
            .send_c_echo_rsp(pcid, message_id, &affected_class, status::SUCCESS)?;
        Ok(Disposition::Continue)
    }

    fn on_timeout(&mut self, _ctx: &DimseContext<'_, TcpStream>) -> medicom_ul::dimse::Result<()> {
        self.timed_out = true;
        Ok(())
    }
}

fn spawn_scp(
    options: DimseOptions,
) -> Result<(
    JoinHandle<(medicom_ul::dimse::Result<Outcome>, MessageSpy)>,
    SocketAddr,
)> {
    let listener = TcpListener::bind("localhost:0")?;
    let addr = listener.local_addr()?;
    let scp = ServerAssociationOptions::new()
        .accept_called_ae_title()
        .ae_title(SCP_AE_TITLE)
        .with_abstract_syntax(VERIFICATION_SOP_CLASS);

    let h = spawn(move || {
        let (stream, _addr) = listener.accept().expect("failed to accept");
        let association = scp.establish(stream).expect("failed to establish");
        let connection =
            Connection::from_server(association, options).expect("failed to build connection");
        let mut handler = MessageSpy::default();
        let outcome = connection.run(&mut handler);
        (outcome, handler)
    });
    Ok((h, addr))
}

fn establish_scu(scp_addr: SocketAddr) -> TcpStream {
    let association = ClientAssociationOptions::new()
        .calling_ae_title(SCU_AE_TITLE)
        .called_ae_title(SCP_AE_TITLE)
        .with_presentation_context(VERIFICATION_SOP_CLASS, vec![IMPLICIT_VR_LE])
        .establish(scp_addr)
        .unwrap();
    association.into_parts().unwrap().socket
}

fn diagnostic_files(dir: &PathBuf) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

/// An unintelligible PDU takes the association down with an abort,
/// leaves the raw bytes in the diagnostics directory,
/// and never reaches the message handler.
#[test]
fn unintelligible_pdu_is_dumped_and_aborts() {
    let diag = tempfile::tempdir().unwrap();
    let options = DimseOptions::default().diagnostics_dir(diag.path());
    let (scp_handle, scp_addr) = spawn_scp(options).unwrap();

    let mut socket = establish_scu(scp_addr);
    // PDU type 0xAA does not exist
    socket
        .write_all(&[0xAA, 0x00, 0x00, 0x00, 0x00, 0x02, 0xDE, 0xAD])
        .unwrap();

    let answer = read_pdu(&mut socket, MAXIMUM_PDU_SIZE, false).unwrap();
    assert!(
        matches!(answer, Pdu::AbortRQ { .. }),
        "expected an abort, got {:?}",
        answer
    );

    let (outcome, handler) = scp_handle.join().expect("SCP panicked");
    assert!(outcome.is_err(), "expected an error, got {:?}", outcome);
    assert_eq!(handler.messages, 0);

    let dumped = diagnostic_files(&diag.path().to_path_buf());
    assert_eq!(dumped.len(), 1, "expected one diagnostics file");
    let bytes = std::fs::read(&dumped[0]).unwrap();
    assert_eq!(bytes[0], 0xAA);
}

/// An association which sits inactive past the configured timeout
/// is aborted by the engine.
#[test]
fn inactive_association_times_out() {
    let options = DimseOptions::default().timeout(Duration::from_millis(300));
    let (scp_handle, scp_addr) = spawn_scp(options).unwrap();

    let mut socket = establish_scu(scp_addr);

    // stay silent; the SCP should give up and abort
    let answer = read_pdu(&mut socket, MAXIMUM_PDU_SIZE, false).unwrap();
    assert_eq!(
        answer,
        Pdu::AbortRQ {
            source: AbortRQSource::ServiceUser,
        }
    );

    let (outcome, handler) = scp_handle.join().expect("SCP panicked");
    assert_eq!(outcome.unwrap(), Outcome::TimedOut);
    assert!(handler.timed_out);
}
