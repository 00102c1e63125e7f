use std::net::{SocketAddr, TcpListener};
use std::thread::{spawn, JoinHandle};

use medicom_ul::association::client::ClientAssociationOptions;
use medicom_ul::association::server::ServerAssociationOptions;
use medicom_ul::pdu::{Pdu, PresentationContextResult, PresentationContextResultReason};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync + 'static>>;

static SCU_AE_TITLE: &str = "ASSOC-SCU";
static SCP_AE_TITLE: &str = "ASSOC-SCP";

static IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
static EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
static VERIFICATION_SOP_CLASS: &str = "1.2.840.10008.1.1";
static DIGITAL_MG_STORAGE_SOP_CLASS: &str = "1.2.840.10008.5.1.4.1.1.1.2";

fn spawn_scp() -> Result<(JoinHandle<Result<()>>, SocketAddr)> {
    let listener = TcpListener::bind("localhost:0")?;
    let addr = listener.local_addr()?;
    let scp = ServerAssociationOptions::new()
        .accept_called_ae_title()
        .ae_title(SCP_AE_TITLE)
        .with_abstract_syntax(VERIFICATION_SOP_CLASS);

    let h = spawn(move || -> Result<()> {
        let (stream, _addr) = listener.accept()?;
        let mut association = scp.establish(stream)?;

        assert_eq!(
            association.presentation_contexts(),
            &[
                PresentationContextResult {
                    id: 1,
                    reason: PresentationContextResultReason::Acceptance,
                    transfer_syntax: EXPLICIT_VR_LE.to_string(),
                },
                PresentationContextResult {
                    id: 3,
                    reason: PresentationContextResultReason::AbstractSyntaxNotSupported,
                    transfer_syntax: IMPLICIT_VR_LE.to_string(),
                }
            ],
        );
        assert_eq!(association.client_ae_title(), SCU_AE_TITLE);

        // handle one release request
        let pdu = association.receive()?;
        assert_eq!(pdu, Pdu::ReleaseRQ);
        association.send(&Pdu::ReleaseRP)?;

        Ok(())
    });
    Ok((h, addr))
}

/// Negotiate an association:
/// the known abstract syntax is accepted
/// on the first supported proposed transfer syntax,
/// the unknown one is refused,
/// and the release handshake completes.
#[test]
fn associate_accept_and_release() {
    let (scp_handle, scp_addr) = spawn_scp().unwrap();

    let association = ClientAssociationOptions::new()
        .calling_ae_title(SCU_AE_TITLE)
        .called_ae_title(SCP_AE_TITLE)
        .with_presentation_context(VERIFICATION_SOP_CLASS, vec![EXPLICIT_VR_LE, IMPLICIT_VR_LE])
        .with_presentation_context(
            DIGITAL_MG_STORAGE_SOP_CLASS,
            vec![EXPLICIT_VR_LE, IMPLICIT_VR_LE],
        )
        .establish(scp_addr)
        .unwrap();

    // only the verification context was accepted
    let accepted: Vec<_> = association
        .presentation_contexts()
        .iter()
        .filter(|pc| pc.reason == PresentationContextResultReason::Acceptance)
        .collect();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].transfer_syntax, EXPLICIT_VR_LE);

    association
        .release()
        .expect("did not have a peaceful release");

    scp_handle
        .join()
        .expect("SCP panicked")
        .expect("SCP failed");
}

/// An association request towards the wrong called AE title is rejected.
#[test]
fn associate_rejected_on_wrong_ae_title() {
    let listener = TcpListener::bind("localhost:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let scp = ServerAssociationOptions::new()
        .accept_called_ae_title()
        .ae_title(SCP_AE_TITLE)
        .with_abstract_syntax(VERIFICATION_SOP_CLASS);

    let h = spawn(move || {
        let (stream, _addr) = listener.accept().expect("failed to accept");
        // establishment fails on this side after sending the rejection
        assert!(scp.establish(stream).is_err());
    });

    let result = ClientAssociationOptions::new()
        .calling_ae_title(SCU_AE_TITLE)
        .called_ae_title("NOT-THE-SCP")
        .with_presentation_context(VERIFICATION_SOP_CLASS, vec![IMPLICIT_VR_LE])
        .establish(addr);

    assert!(
        matches!(
            result,
            Err(medicom_ul::association::client::Error::Rejected { .. })
        ),
        "expected a rejection"
    );

    h.join().expect("SCP panicked");
}
