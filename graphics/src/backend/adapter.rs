//! Backend-independent adapter selection.

use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{AdapterInfo, AdapterType};

/// Pick an adapter from the enumerated `candidates`.
///
/// A non-zero `preferred` index selects that adapter when it exists. Otherwise
/// the first discrete adapter wins, then any other hardware adapter, and only
/// then a software rasterizer.
pub(crate) fn select_adapter<T>(
    candidates: Vec<(AdapterInfo, T)>,
    preferred: u32,
) -> GraphicsResult<(AdapterInfo, T)> {
    if candidates.is_empty() {
        return Err(GraphicsError::Initialization(
            "no graphics adapters found".to_string(),
        ));
    }

    let preferred = preferred as usize;
    if preferred > 0 && preferred >= candidates.len() {
        log::warn!(
            "Preferred adapter index {} out of range ({} adapters), using default",
            preferred,
            candidates.len()
        );
    }

    let index = if preferred > 0 && preferred < candidates.len() {
        preferred
    } else if let Some(i) = candidates
        .iter()
        .position(|(info, _)| info.adapter_type == AdapterType::Discrete)
    {
        i
    } else if let Some(i) = candidates
        .iter()
        .position(|(info, _)| info.adapter_type.is_hardware())
    {
        i
    } else {
        log::warn!("No hardware adapter available, falling back to software rasterizer");
        0
    };

    let chosen = candidates
        .into_iter()
        .nth(index)
        .ok_or_else(|| GraphicsError::Initialization("adapter selection failed".to_string()))?;
    log::info!(
        "Selected adapter '{}' ({:?})",
        chosen.0.name,
        chosen.0.adapter_type
    );
    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(name: &str, adapter_type: AdapterType) -> (AdapterInfo, &'static str) {
        (
            AdapterInfo {
                name: name.to_string(),
                vendor_id: 0,
                device_id: 0,
                adapter_type,
                dedicated_memory: 0,
            },
            "handle",
        )
    }

    #[test]
    fn test_prefers_discrete_adapter() {
        let candidates = vec![
            adapter("igpu", AdapterType::Integrated),
            adapter("dgpu", AdapterType::Discrete),
        ];
        let (info, _) = select_adapter(candidates, 0).unwrap();
        assert_eq!(info.name, "dgpu");
    }

    #[test]
    fn test_falls_back_to_software() {
        let candidates = vec![adapter("warp", AdapterType::Software)];
        let (info, _) = select_adapter(candidates, 0).unwrap();
        assert_eq!(info.adapter_type, AdapterType::Software);
    }

    #[test]
    fn test_hardware_before_software() {
        let candidates = vec![
            adapter("llvmpipe", AdapterType::Software),
            adapter("igpu", AdapterType::Integrated),
        ];
        let (info, _) = select_adapter(candidates, 0).unwrap();
        assert_eq!(info.name, "igpu");
    }

    #[test]
    fn test_preferred_index_wins() {
        let candidates = vec![
            adapter("dgpu", AdapterType::Discrete),
            adapter("igpu", AdapterType::Integrated),
        ];
        let (info, _) = select_adapter(candidates, 1).unwrap();
        assert_eq!(info.name, "igpu");
    }

    #[test]
    fn test_no_adapters_is_initialization_error() {
        let result = select_adapter::<()>(Vec::new(), 0);
        assert!(matches!(result, Err(GraphicsError::Initialization(_))));
    }
}
