//! Registro de algoritmos: mapeia (família, nome) para a fábrica do kernel
//! e resolve as tabelas de inferência usadas pelo carregador de perfis

use tracing::warn;

use crate::algorithms::{
    param_f64, AcMiner, ArMiner, CfdMiner, DcMiner, DdMiner, FdMiner, IndMiner, MdMiner,
    MiningAlgorithm, NarMiner, OdMiner, OdVariant, SfdMiner, UccMiner,
};
use crate::types::{
    AlgoParams, AlgorithmFamily, AlgorithmName, ProfilerError, ProfilerResult, ERROR_PARAM,
};

/// Algoritmo padrão de cada família
pub fn default_algorithm(family: AlgorithmFamily) -> AlgorithmName {
    match family {
        AlgorithmFamily::Fd => AlgorithmName::Hyfd,
        AlgorithmFamily::Afd => AlgorithmName::Pyro,
        AlgorithmFamily::Ind => AlgorithmName::Spider,
        AlgorithmFamily::Aind => AlgorithmName::Spider,
        AlgorithmFamily::Ucc => AlgorithmName::Hpivalid,
        AlgorithmFamily::Aucc => AlgorithmName::Pyroucc,
        AlgorithmFamily::Od => AlgorithmName::Fastod,
        AlgorithmFamily::Ar => AlgorithmName::Apriori,
        AlgorithmFamily::Dd => AlgorithmName::Split,
        AlgorithmFamily::Cfd => AlgorithmName::FdFirst,
        AlgorithmFamily::Nar => AlgorithmName::Des,
        AlgorithmFamily::Dc => AlgorithmName::Fastadc,
        AlgorithmFamily::Ac => AlgorithmName::Acalgorithm,
        AlgorithmFamily::Sfd => AlgorithmName::Sfdalgorithm,
        AlgorithmFamily::Md => AlgorithmName::Hymd,
    }
}

/// Infere a família a partir do nome do algoritmo, tomando o ramo da
/// variante aproximada quando `error > 0` está nos parâmetros
pub fn family_for_algorithm(
    algorithm: AlgorithmName,
    params: &AlgoParams,
) -> Option<AlgorithmFamily> {
    let approximate = param_f64(params, ERROR_PARAM).map(|e| e > 0.0).unwrap_or(false);
    let family = match algorithm {
        AlgorithmName::Split => AlgorithmFamily::Dd,
        AlgorithmName::Apriori => AlgorithmFamily::Ar,
        AlgorithmName::Fastod | AlgorithmName::Order => AlgorithmFamily::Od,
        AlgorithmName::FdFirst => AlgorithmFamily::Cfd,
        AlgorithmName::Pyroucc => {
            if approximate {
                AlgorithmFamily::Aucc
            } else {
                AlgorithmFamily::Ucc
            }
        }
        AlgorithmName::Hpivalid | AlgorithmName::Hyucc => AlgorithmFamily::Ucc,
        AlgorithmName::Spider => {
            if approximate {
                AlgorithmFamily::Aind
            } else {
                AlgorithmFamily::Ind
            }
        }
        AlgorithmName::Faida => AlgorithmFamily::Ind,
        AlgorithmName::Pyro | AlgorithmName::Tane => {
            if approximate {
                AlgorithmFamily::Afd
            } else {
                AlgorithmFamily::Fd
            }
        }
        AlgorithmName::Hyfd
        | AlgorithmName::Dfd
        | AlgorithmName::Aid
        | AlgorithmName::Depminer
        | AlgorithmName::Eulerfd
        | AlgorithmName::Fastfds
        | AlgorithmName::Fdep
        | AlgorithmName::Fun
        | AlgorithmName::Pfdtane => AlgorithmFamily::Fd,
        AlgorithmName::Des => AlgorithmFamily::Nar,
        AlgorithmName::Fastadc => AlgorithmFamily::Dc,
        AlgorithmName::Acalgorithm => AlgorithmFamily::Ac,
        AlgorithmName::Sfdalgorithm => AlgorithmFamily::Sfd,
        AlgorithmName::Hymd => AlgorithmFamily::Md,
        AlgorithmName::Default => {
            warn!("Algoritmo 'default' sem família explícita não é inferível");
            return None;
        }
    };
    Some(family)
}

fn check_member(
    family: AlgorithmFamily,
    algorithm: AlgorithmName,
    allowed: &[AlgorithmName],
) -> ProfilerResult<()> {
    if algorithm == AlgorithmName::Default || allowed.contains(&algorithm) {
        Ok(())
    } else {
        Err(ProfilerError::UnknownAlgorithm(format!(
            "{} não pertence à família {}",
            algorithm, family
        )))
    }
}

/// Fábrica: instancia o kernel de mineração para (família, algoritmo)
pub fn create_mining_algorithm(
    family: AlgorithmFamily,
    algorithm: AlgorithmName,
    params: &AlgoParams,
) -> ProfilerResult<Box<dyn MiningAlgorithm>> {
    match family {
        AlgorithmFamily::Fd => {
            check_member(
                family,
                algorithm,
                &[
                    AlgorithmName::Hyfd,
                    AlgorithmName::Dfd,
                    AlgorithmName::Aid,
                    AlgorithmName::Depminer,
                    AlgorithmName::Eulerfd,
                    AlgorithmName::Fastfds,
                    AlgorithmName::Fdep,
                    AlgorithmName::Fun,
                    AlgorithmName::Pfdtane,
                    AlgorithmName::Pyro,
                    AlgorithmName::Tane,
                ],
            )?;
            Ok(Box::new(FdMiner::new("FD", params, 0.0)))
        }
        AlgorithmFamily::Afd => {
            check_member(family, algorithm, &[AlgorithmName::Pyro, AlgorithmName::Tane])?;
            Ok(Box::new(FdMiner::new("AFD", params, 0.05)))
        }
        AlgorithmFamily::Cfd => Ok(Box::new(CfdMiner::new(params))),
        AlgorithmFamily::Ind => {
            check_member(family, algorithm, &[AlgorithmName::Spider, AlgorithmName::Faida])?;
            Ok(Box::new(IndMiner::new("IND", params, 0.0)))
        }
        AlgorithmFamily::Aind => Ok(Box::new(IndMiner::new("AIND", params, 0.05))),
        AlgorithmFamily::Ucc => {
            check_member(
                family,
                algorithm,
                &[AlgorithmName::Pyroucc, AlgorithmName::Hyucc, AlgorithmName::Hpivalid],
            )?;
            Ok(Box::new(UccMiner::new("UCC", params, 0.0)))
        }
        AlgorithmFamily::Aucc => Ok(Box::new(UccMiner::new("AUCC", params, 0.05))),
        AlgorithmFamily::Dd => Ok(Box::new(DdMiner::new(params))),
        AlgorithmFamily::Ar => Ok(Box::new(ArMiner::new(params))),
        AlgorithmFamily::Od => {
            check_member(family, algorithm, &[AlgorithmName::Fastod, AlgorithmName::Order])?;
            let variant = if algorithm == AlgorithmName::Order {
                OdVariant::Order
            } else {
                OdVariant::Fastod
            };
            Ok(Box::new(OdMiner::new(variant)))
        }
        AlgorithmFamily::Nar => Ok(Box::new(NarMiner::new(params))),
        AlgorithmFamily::Dc => Ok(Box::new(DcMiner::new(params))),
        AlgorithmFamily::Ac => Ok(Box::new(AcMiner::new(params))),
        AlgorithmFamily::Sfd => Ok(Box::new(SfdMiner::new(params))),
        AlgorithmFamily::Md => Ok(Box::new(MdMiner::new(params))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_algorithm_table() {
        assert_eq!(default_algorithm(AlgorithmFamily::Fd), AlgorithmName::Hyfd);
        assert_eq!(default_algorithm(AlgorithmFamily::Ucc), AlgorithmName::Hpivalid);
        assert_eq!(default_algorithm(AlgorithmFamily::Md), AlgorithmName::Hymd);
    }

    #[test]
    fn test_family_inference_exact() {
        assert_eq!(
            family_for_algorithm(AlgorithmName::Hyfd, &AlgoParams::new()),
            Some(AlgorithmFamily::Fd)
        );
        assert_eq!(
            family_for_algorithm(AlgorithmName::Split, &AlgoParams::new()),
            Some(AlgorithmFamily::Dd)
        );
    }

    #[test]
    fn test_family_inference_takes_approximate_branch() {
        let mut params = AlgoParams::new();
        params.insert("error".to_string(), json!(0.1));

        assert_eq!(
            family_for_algorithm(AlgorithmName::Pyro, &params),
            Some(AlgorithmFamily::Afd)
        );
        assert_eq!(
            family_for_algorithm(AlgorithmName::Spider, &params),
            Some(AlgorithmFamily::Aind)
        );
        assert_eq!(
            family_for_algorithm(AlgorithmName::Pyroucc, &params),
            Some(AlgorithmFamily::Aucc)
        );

        params.insert("error".to_string(), json!(0.0));
        assert_eq!(
            family_for_algorithm(AlgorithmName::Pyro, &params),
            Some(AlgorithmFamily::Fd)
        );
    }

    #[test]
    fn test_factory_rejects_foreign_algorithm() {
        let result = create_mining_algorithm(
            AlgorithmFamily::Fd,
            AlgorithmName::Apriori,
            &AlgoParams::new(),
        );
        assert!(matches!(result, Err(ProfilerError::UnknownAlgorithm(_))));
    }

    #[test]
    fn test_factory_accepts_default_everywhere() {
        for family in [AlgorithmFamily::Fd, AlgorithmFamily::Od, AlgorithmFamily::Ucc] {
            assert!(create_mining_algorithm(family, AlgorithmName::Default, &AlgoParams::new())
                .is_ok());
        }
    }
}
