//! Similarity of snippets to a reference snippet.

use seekpipe_core::{Error, QueryContext, Result, Snippet, SnippetId, TfIdfVector};

use crate::clustering::distance_normed_points;

/// Set each candidate's IR score to its dot product with the reference.
///
/// Candidates without a TF-IDF vector keep their current score.
pub fn score_against_reference(reference: Option<&Snippet>, candidates: &mut [Snippet]) -> Result<()> {
    let reference = reference.ok_or(Error::NoReference)?;
    let ref_features = reference
        .features_tfidf()
        .ok_or(Error::NoReferenceFeatures(reference.id))?;
    score_with(ref_features, candidates);
    Ok(())
}

/// Score every other snippet of `qc` against snippet `ref_id`.
pub fn score_query_against(qc: &mut QueryContext, ref_id: SnippetId) -> Result<()> {
    let pos = qc.position(ref_id)?;
    let (before, rest) = qc.snippets.split_at_mut(pos);
    let Some((reference, after)) = rest.split_first_mut() else {
        return Err(Error::UnknownSnippet(ref_id));
    };
    let ref_features = reference
        .features_tfidf()
        .ok_or(Error::NoReferenceFeatures(ref_id))?;
    score_with(ref_features, before);
    score_with(ref_features, after);
    Ok(())
}

fn score_with(ref_features: &TfIdfVector, candidates: &mut [Snippet]) {
    for sp in candidates.iter_mut() {
        if let Some(v) = sp.features_tfidf() {
            sp.ir_score = distance_normed_points(ref_features, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seekpipe_core::BagOfWords;

    fn with_vec(id: SnippetId, v: &[(u32, f32)]) -> Snippet {
        let mut sp = Snippet::new(id, &format!("https://example.com/{id}"));
        sp.set_tfidf(v.iter().copied().collect::<TfIdfVector>(), BagOfWords::new());
        sp
    }

    #[test]
    fn missing_reference_is_reported() {
        let mut cands = vec![with_vec(2, &[(1, 1.0)])];
        assert!(matches!(
            score_against_reference(None, &mut cands),
            Err(Error::NoReference)
        ));
    }

    #[test]
    fn reference_without_features_is_reported() {
        let reference = Snippet::new(1, "https://example.com/ref");
        let mut cands = vec![with_vec(2, &[(1, 1.0)])];
        assert!(matches!(
            score_against_reference(Some(&reference), &mut cands),
            Err(Error::NoReferenceFeatures(1))
        ));
        assert_eq!(cands[0].ir_score, 0.0);
    }

    #[test]
    fn candidates_without_vectors_keep_their_score() {
        let reference = with_vec(1, &[(1, 0.5), (2, 0.5)]);
        let mut bare = Snippet::new(3, "https://example.com/bare");
        bare.ir_score = 0.42;
        let mut cands = vec![with_vec(2, &[(1, 0.4), (3, 0.6)]), bare];
        score_against_reference(Some(&reference), &mut cands).unwrap();
        assert!((cands[0].ir_score - 0.2).abs() < 1e-6);
        assert_eq!(cands[1].ir_score, 0.42);
    }

    #[test]
    fn query_scoring_skips_the_reference() {
        let mut qc = QueryContext::new("q");
        qc.add_snippet(with_vec(1, &[(1, 1.0)]));
        qc.add_snippet(with_vec(2, &[(1, 0.5)]));
        qc.add_snippet(with_vec(3, &[(2, 1.0)]));
        qc.snippet_mut(2).unwrap().ir_score = 9.0;

        score_query_against(&mut qc, 2).unwrap();
        assert_eq!(qc.snippet(1).unwrap().ir_score, 0.5);
        assert_eq!(qc.snippet(2).unwrap().ir_score, 9.0);
        assert_eq!(qc.snippet(3).unwrap().ir_score, 0.0);

        assert!(matches!(
            score_query_against(&mut qc, 99),
            Err(Error::UnknownSnippet(99))
        ));
    }

    #[test]
    fn query_reference_without_vector_leaves_scores_alone() {
        let mut qc = QueryContext::new("q");
        qc.add_snippet(Snippet::new(1, "https://example.com/ref"));
        qc.add_snippet(with_vec(2, &[(1, 0.5)]));
        qc.snippet_mut(2).unwrap().ir_score = 0.3;
        assert!(matches!(
            score_query_against(&mut qc, 1),
            Err(Error::NoReferenceFeatures(1))
        ));
        assert_eq!(qc.snippet(2).unwrap().ir_score, 0.3);
    }
}
