use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{spawn, JoinHandle};

use medicom_core::{DataElement, Dataset, PrimitiveValue, Tag, VR};
use medicom_ul::association::client::ClientAssociationOptions;
use medicom_ul::association::server::ServerAssociationOptions;
use medicom_ul::dimse::{
    status, Connection, DimseContext, DimseHandler, DimseOptions, Disposition, Outcome, Priority,
};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync + 'static>>;

static SCU_AE_TITLE: &str = "STORE-SCU";
static SCP_AE_TITLE: &str = "STORE-SCP";

static IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
static DIGITAL_MG_STORAGE_SOP_CLASS: &str = "1.2.840.10008.5.1.4.1.1.1.2";
static SOP_INSTANCE_UID: &str = "1.2.888.123.4567.1";

const SOP_CLASS_UID: Tag = Tag(0x0008, 0x0016);
const SOP_INSTANCE: Tag = Tag(0x0008, 0x0018);
const PIXEL_DATA: Tag = Tag(0x7FE0, 0x0010);

/// 100 000 bytes of pixel data.
const PIXEL_WORDS: usize = 50_000;

fn pixel_words() -> Vec<u16> {
    (0..PIXEL_WORDS).map(|i| (i % 0x8000) as u16).collect()
}

fn store_dataset() -> Dataset {
    let mut obj = Dataset::new();
    obj.put_value(SOP_CLASS_UID, VR::UI, DIGITAL_MG_STORAGE_SOP_CLASS);
    obj.put_value(SOP_INSTANCE, VR::UI, SOP_INSTANCE_UID);
    obj.put(DataElement::new(
        PIXEL_DATA,
        VR::OW,
        PrimitiveValue::U16(pixel_words().into()),
    ));
    obj
}

#[derive(Default)]
struct StoreScp {
    stored: usize,
}

impl DimseHandler<TcpStream> for StoreScp {
    fn on_c_store_rq(
        &mut self,
        ctx: &DimseContext<'_, TcpStream>,
        pcid: u8,
        message_id: u16,
        affected_class: String,
        affected_instance: String,
        priority: Priority,
        dataset: Dataset,
    ) -> medicom_ul::dimse::Result<Disposition> {
        assert_eq!(affected_class, DIGITAL_MG_STORAGE_SOP_CLASS);
        assert_eq!(affected_instance, SOP_INSTANCE_UID);
        assert_eq!(priority, Priority::Medium);
        assert_eq!(
            dataset.get_str(SOP_INSTANCE).as_deref(),
            Some(SOP_INSTANCE_UID)
        );
        let pixels = dataset
            .get(PIXEL_DATA)
            .and_then(|e| e.value().as_primitive())
            .expect("pixel data must be present");
        assert_eq!(pixels.uint16_slice().unwrap(), &pixel_words()[..]);
        self.stored += 1;

        ctx.sender().send_c_store_rsp(
            pcid,
            message_id,
            &affected_class,
            &affected_instance,
            status::SUCCESS,
        )?;
        Ok(Disposition::Continue)
    }
}

#[derive(Default)]
struct StoreScu {
    status: Option<u16>,
    progress: Vec<u64>,
}

impl DimseHandler<TcpStream> for StoreScu {
    fn on_association_established(
        &mut self,
        ctx: &DimseContext<'_, TcpStream>,
    ) -> medicom_ul::dimse::Result<()> {
        let pc = &ctx.presentation_contexts()[0];
        let dataset = store_dataset();
        let mut progress = Vec::new();
        ctx.sender().send_c_store_rq(
            pc.id,
            1,
            DIGITAL_MG_STORAGE_SOP_CLASS,
            SOP_INSTANCE_UID,
            Priority::Medium,
            &dataset,
            Some(&mut |sent| progress.push(sent)),
        )?;
        self.progress = progress;
        Ok(())
    }

    fn on_c_store_rsp(
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

fn spawn_scp() -> Result<(JoinHandle<Result<(Outcome, StoreScp)>>, SocketAddr)> {
    let listener = TcpListener::bind("localhost:0")?;
    let addr = listener.local_addr()?;
    let scp = ServerAssociationOptions::new()
        .accept_called_ae_title()
        .ae_title(SCP_AE_TITLE)
        .with_abstract_syntax(DIGITAL_MG_STORAGE_SOP_CLASS);

    let h = spawn(move || -> Result<(Outcome, StoreScp)> {
        let (stream, _addr) = listener.accept()?;
        let association = scp.establish(stream)?;
        // the default spool policy writes C-STORE data sets
        // to a temporary file while they come in
        let connection = Connection::from_server(association, DimseOptions::default())?;
        let mut handler = StoreScp::default();
        let outcome = connection.run(&mut handler)?;
        Ok((outcome, handler))
    });
    Ok((h, addr))
}

/// Store a 100 000 byte object over an association
/// limited to the default maximum PDU length,
/// so that the data set travels in multiple P-DATA PDUs.
#[test]
fn scu_scp_store_large_object() {
    let (scp_handle, scp_addr) = spawn_scp().unwrap();

    let association = ClientAssociationOptions::new()
        .calling_ae_title(SCU_AE_TITLE)
        .called_ae_title(SCP_AE_TITLE)
        .with_presentation_context(DIGITAL_MG_STORAGE_SOP_CLASS, vec![IMPLICIT_VR_LE])
        .establish(scp_addr)
        .unwrap();

    let connection = Connection::from_client(association, DimseOptions::default()).unwrap();
    let mut handler = StoreScu::default();
    let outcome = connection.run(&mut handler).unwrap();

    assert_eq!(outcome, Outcome::Released);
    assert_eq!(handler.status, Some(status::SUCCESS));

    // progress reports are cumulative and cover the whole data set
    assert!(handler.progress.len() > 1);
    assert!(handler
        .progress
        .windows(2)
        .all(|pair| pair[0] <= pair[1]));
    let total = *handler.progress.last().unwrap();
    assert!(total >= (PIXEL_WORDS * 2) as u64, "total was {}", total);

    let (scp_outcome, scp_handler) = scp_handle
        .join()
        .expect("SCP panicked")
        .expect("SCP failed");
    assert_eq!(scp_outcome, Outcome::Released);
    assert_eq!(scp_handler.stored, 1);
}
