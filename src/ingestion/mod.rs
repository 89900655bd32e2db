//! Turning a source product into a normalized [`Product`].
//!
//! An adapter describes its output as a list of [`VariableReader`]s. [`ingest`] runs each
//! of them against an [`IngestionSession`] and collects the results. If any variable fails
//! to read, the whole ingestion fails and no product is returned.
use error_stack::ResultExt;
use log::{debug, info};

use crate::error::{IngestError, IntoIngestReport};
use crate::product::{Product, Variable};

pub mod session;
pub mod variables;

pub use session::{CoefficientSource, IngestionSession};
pub use variables::{
    BoundsLayout, BroadcastFieldReader, FieldReader, FillValue, LevelPressureReader,
    PressureBoundsReader, TropopausePressureReader, VariableReader,
};

/// Read every available variable described by `readers` into a new product.
pub fn ingest(
    session: &IngestionSession<'_>,
    readers: &[Box<dyn VariableReader>],
) -> error_stack::Result<Product, IngestError> {
    let mut product = Product::new(session.dimensions().clone());

    for reader in readers {
        let def = reader.definition();
        if !reader.is_available(session) {
            info!("Variable '{}' is not available in this {} product, skipping", def.name, session.adapter());
            continue;
        }

        let shape = def.shape(session.dimensions()).into_ingest()?;
        debug!("Reading '{}' with shape {shape:?}", def.name);
        let data = reader
            .read(session, &shape)
            .attach_printable_lazy(|| format!("while reading variable '{}'", def.name))?;
        let variable = Variable::new(def.clone(), shape, data).into_ingest()?;
        product.add_variable(variable).into_ingest()?;
    }

    info!(
        "Ingested {} variables from the {} product",
        product.num_variables(),
        session.adapter()
    );
    Ok(product)
}
