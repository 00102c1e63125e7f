use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{spawn, JoinHandle};

use medicom_ul::association::client::ClientAssociationOptions;
use medicom_ul::association::server::ServerAssociationOptions;
use medicom_ul::dimse::{
    status, Connection, DimseContext, DimseHandler, DimseOptions, Disposition, Outcome,
};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync + 'static>>;

static SCU_AE_TITLE: &str = "ECHO-SCU";
static SCP_AE_TITLE: &str = "ECHO-SCP";

static IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
static EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
static VERIFICATION_SOP_CLASS: &str = "1.2.840.10008.1.1";

#[derive(Default)]
struct EchoScp {
    received: Vec<u16>,
}

impl DimseHandler<TcpStream> for EchoScp {
    fn on_c_echo_rq(
        &mut self,
        ctx: &DimseContext<'_, TcpStream>,
        pcid: u8,
        message_id: u16,
        affected_class: String,
    ) -> medicom_ul::dimse::Result<Disposition> {
        assert_eq!(affected_class, VERIFICATION_SOP_CLASS);
        self.received.push(message_id);
        ctx.sender()
            .send_c_echo_rsp(pcid, message_id, &affected_class, status::SUCCESS)?;
        Ok(Disposition::Continue)
    }
}

#[derive(Default)]
struct EchoScu {
    status: Option<u16>,
}

impl DimseHandler<TcpStream> for EchoScu {
    fn on_association_established(
        &mut self,
        ctx: &DimseContext<'_, TcpStream>,
    ) -> medicom_ul::dimse::Result<()> {
        let pc = &ctx.presentation_contexts()[0];
        ctx.sender().send_c_echo_rq(pc.id, 1, VERIFICATION_SOP_CLASS)
    }

    fn on_c_echo_rsp(
        &mut self,
        _ctx: &DimseContext<'_, TcpStream>,
        _pcid: u8,
        responded_to: u16,
        status: u16,
    ) -> medicom_ul::dimse::Result<Disposition> {
        assert_eq!(responded_to, 1);
        self.status = Some(status);
        Ok(Disposition::Release)
    }
}

fn spawn_scp() -> Result<(JoinHandle<Result<(Outcome, EchoScp)>>, SocketAddr)> {
    let listener = TcpListener::bind("localhost:0")?;
    let addr = listener.local_addr()?;
    let scp = ServerAssociationOptions::new()
        .accept_called_ae_title()
        .ae_title(SCP_AE_TITLE)
        .with_abstract_syntax(VERIFICATION_SOP_CLASS);

    let h = spawn(move || -> Result<(Outcome, EchoScp)> {
        let (stream, _addr) = listener.accept()?;
        let association = scp.establish(stream)?;
        let connection = Connection::from_server(association, DimseOptions::default())?;
        let mut handler = EchoScp::default();
        let outcome = connection.run(&mut handler)?;
        Ok((outcome, handler))
    });
    Ok((h, addr))
}

/// Run an SCP and an SCU concurrently,
/// exchange a C-ECHO message and release the association.
#[test]
fn scu_scp_echo_exchange() {
    let (scp_handle, scp_addr) = spawn_scp().unwrap();

    let association = ClientAssociationOptions::new()
        .calling_ae_title(SCU_AE_TITLE)
        .called_ae_title(SCP_AE_TITLE)
        .with_presentation_context(VERIFICATION_SOP_CLASS, vec![IMPLICIT_VR_LE, EXPLICIT_VR_LE])
        .establish(scp_addr)
        .unwrap();

    let connection = Connection::from_client(association, DimseOptions::default()).unwrap();
    let mut handler = EchoScu::default();
    let outcome = connection.run(&mut handler).unwrap();

    assert_eq!(outcome, Outcome::Released);
    assert_eq!(handler.status, Some(status::SUCCESS));

    let (scp_outcome, scp_handler) = scp_handle
        .join()
        .expect("SCP panicked")
        .expect("SCP failed");
    assert_eq!(scp_outcome, Outcome::Released);
    assert_eq!(scp_handler.received, vec![1]);
}
